//! Runtime values.
//!
//! `Value` is the boxed representation the interpreter computes with.
//! Scalars, booleans and loop indices are plain payloads; matrices and
//! strings are reference counted, and cloning one is the runtime's "grab"
//! (the reference count is observable through [`Value::strong_count`], which
//! the specializer's refcount-mirroring tests rely on).

use std::fmt;
use std::rc::Rc;

// ============================================================================
// Range
// ============================================================================

/// A numeric range `base : inc : limit`, materialized lazily.
///
/// The element count and the element rule are the single source of truth for
/// loop iteration; compiled code and the interpreter both go through them,
/// which keeps results bit-identical between the two paths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    base: f64,
    limit: f64,
    inc: f64,
    nelem: i64,
}

impl Range {
    pub fn new(base: f64, limit: f64, inc: f64) -> Range {
        let nelem = if inc == 0.0 || !base.is_finite() || !limit.is_finite() || !inc.is_finite() {
            0
        } else {
            let span = (limit - base) / inc;
            if span < 0.0 {
                0
            } else {
                span.floor() as i64 + 1
            }
        };
        Range { base, limit, inc, nelem }
    }

    /// `base : limit` with an implicit increment of one.
    pub fn counted(base: f64, limit: f64) -> Range {
        Range::new(base, limit, 1.0)
    }

    #[inline]
    pub fn base(&self) -> f64 {
        self.base
    }

    #[inline]
    pub fn limit(&self) -> f64 {
        self.limit
    }

    #[inline]
    pub fn inc(&self) -> f64 {
        self.inc
    }

    #[inline]
    pub fn nelem(&self) -> i64 {
        self.nelem
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nelem == 0
    }

    /// The `idx`-th element (zero based). `idx` must be below `nelem`.
    #[inline]
    pub fn elem(&self, idx: i64) -> f64 {
        self.base + idx as f64 * self.inc
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.nelem).map(|i| self.elem(i))
    }
}

// ============================================================================
// Value
// ============================================================================

/// A dynamically typed runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// An unbound variable slot. Never produced by evaluation; reading one
    /// is a runtime fault.
    Undef,
    Bool(bool),
    Scalar(f64),
    /// Machine-integer loop counter. Internal to iteration; user code only
    /// ever observes scalars.
    Index(i64),
    Range(Range),
    Str(Rc<str>),
    /// A row vector. The payload is shared; assignment aliases it.
    Matrix(Rc<[f64]>),
}

impl Value {
    pub fn scalar(x: f64) -> Value {
        Value::Scalar(x)
    }

    pub fn range(base: f64, limit: f64, inc: f64) -> Value {
        Value::Range(Range::new(base, limit, inc))
    }

    pub fn matrix(elems: Vec<f64>) -> Value {
        Value::Matrix(elems.into())
    }

    pub fn str(s: &str) -> Value {
        Value::Str(s.into())
    }

    #[inline]
    pub fn is_undef(&self) -> bool {
        matches!(self, Value::Undef)
    }

    /// Short name used in fault messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undef => "undefined",
            Value::Bool(_) => "bool",
            Value::Scalar(_) => "double",
            Value::Index(_) => "index",
            Value::Range(_) => "range",
            Value::Str(_) => "string",
            Value::Matrix(_) => "matrix",
        }
    }

    /// Numeric view of the value, coercing booleans and indices the way the
    /// dynamic operators do.
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Scalar(x) => Some(x),
            Value::Bool(b) => Some(b as u8 as f64),
            Value::Index(i) => Some(i as f64),
            _ => None,
        }
    }

    /// Reference count of the shared payload, if the value has one.
    pub fn strong_count(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(Rc::strong_count(s)),
            Value::Matrix(m) => Some(Rc::strong_count(m)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undef => write!(f, "<undefined>"),
            Value::Bool(b) => write!(f, "{}", *b as u8),
            Value::Scalar(x) => write!(f, "{x}"),
            Value::Index(i) => write!(f, "{i}"),
            Value::Range(r) => write!(f, "{}:{}:{}", r.base(), r.inc(), r.limit()),
            Value::Str(s) => write!(f, "{s}"),
            Value::Matrix(m) => {
                write!(f, "[")?;
                for (i, x) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{x}")?;
                }
                write!(f, "]")
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
