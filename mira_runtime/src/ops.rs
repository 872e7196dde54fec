//! Dynamic operator dispatch.
//!
//! One implementation of the language's binary operators and truthiness
//! rules, shared by the tree-walking interpreter and by the specializer's
//! boxed fallback kernels. Scalar arithmetic is IEEE throughout: division by
//! zero yields an infinity, not a fault, on either execution path.

use std::fmt;

use thiserror::Error;

use crate::value::Value;

// ============================================================================
// Operators
// ============================================================================

/// Binary operators of the surface language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
    Ne,
}

impl BinOp {
    pub const ALL: [BinOp; 10] = [
        BinOp::Add,
        BinOp::Sub,
        BinOp::Mul,
        BinOp::Div,
        BinOp::Lt,
        BinOp::Le,
        BinOp::Eq,
        BinOp::Ge,
        BinOp::Gt,
        BinOp::Ne,
    ];

    #[inline]
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Lt | BinOp::Le | BinOp::Eq | BinOp::Ge | BinOp::Gt | BinOp::Ne
        )
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Eq => "==",
            BinOp::Ge => ">=",
            BinOp::Gt => ">",
            BinOp::Ne => "!=",
        }
    }

    #[inline]
    pub fn apply_f64(&self, a: f64, b: f64) -> Value {
        match self {
            BinOp::Add => Value::Scalar(a + b),
            BinOp::Sub => Value::Scalar(a - b),
            BinOp::Mul => Value::Scalar(a * b),
            BinOp::Div => Value::Scalar(a / b),
            BinOp::Lt => Value::Bool(a < b),
            BinOp::Le => Value::Bool(a <= b),
            BinOp::Eq => Value::Bool(a == b),
            BinOp::Ge => Value::Bool(a >= b),
            BinOp::Gt => Value::Bool(a > b),
            BinOp::Ne => Value::Bool(a != b),
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

// ============================================================================
// Faults
// ============================================================================

/// A fault raised by dynamic evaluation. Compiled code surfaces the same
/// faults through its boxed kernels, so error behavior matches the
/// interpreter's.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeFault {
    #[error("'{0}' undefined")]
    Undefined(String),
    #[error("undefined value used in expression")]
    UndefinedOperand,
    #[error("binary operator '{op}' not implemented for '{lhs}' by '{rhs}' operations")]
    UndefinedBinary {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },
    #[error("nonconformant arguments (op1 is 1x{lhs}, op2 is 1x{rhs})")]
    Nonconformant { lhs: usize, rhs: usize },
    #[error("{0} value used in conditional expression")]
    NotLogical(&'static str),
    /// An execution-engine defect, not a language-level error.
    #[error("internal error: {0}")]
    Internal(&'static str),
}

// ============================================================================
// Dispatch
// ============================================================================

fn undefined_binary(op: BinOp, lhs: &Value, rhs: &Value) -> RuntimeFault {
    RuntimeFault::UndefinedBinary {
        op: op.symbol(),
        lhs: lhs.type_name(),
        rhs: rhs.type_name(),
    }
}

fn matrix_map(m: &[f64], f: impl Fn(f64) -> f64) -> Value {
    Value::Matrix(m.iter().map(|&x| f(x)).collect::<Vec<_>>().into())
}

/// Apply `op` to two boxed values.
pub fn binary_op(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, RuntimeFault> {
    if lhs.is_undef() || rhs.is_undef() {
        return Err(RuntimeFault::UndefinedOperand);
    }
    if let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) {
        return Ok(op.apply_f64(a, b));
    }
    if op.is_comparison() {
        return Err(undefined_binary(op, lhs, rhs));
    }
    match (lhs, rhs) {
        (Value::Matrix(a), Value::Matrix(b)) => {
            if a.len() != b.len() {
                return Err(RuntimeFault::Nonconformant { lhs: a.len(), rhs: b.len() });
            }
            let elems: Vec<f64> = a.iter().zip(b.iter()).map(|(&x, &y)| scalar_of(op, x, y)).collect();
            Ok(Value::Matrix(elems.into()))
        }
        (Value::Matrix(m), other) => {
            let b = other.as_f64().ok_or_else(|| undefined_binary(op, lhs, rhs))?;
            Ok(matrix_map(m, |a| scalar_of(op, a, b)))
        }
        (other, Value::Matrix(m)) => {
            let a = other.as_f64().ok_or_else(|| undefined_binary(op, lhs, rhs))?;
            Ok(matrix_map(m, |b| scalar_of(op, a, b)))
        }
        _ => Err(undefined_binary(op, lhs, rhs)),
    }
}

#[inline]
fn scalar_of(op: BinOp, a: f64, b: f64) -> f64 {
    match op.apply_f64(a, b) {
        Value::Scalar(x) => x,
        // arithmetic ops only reach here
        _ => unreachable!(),
    }
}

/// Truthiness of a condition value. NaN compares unequal to zero and is
/// therefore true, matching the compiled comparison kernels.
pub fn is_true(v: &Value) -> Result<bool, RuntimeFault> {
    match v {
        Value::Bool(b) => Ok(*b),
        Value::Scalar(x) => Ok(*x != 0.0),
        Value::Index(i) => Ok(*i != 0),
        Value::Range(r) => Ok(!r.is_empty() && r.iter().all(|x| x != 0.0)),
        Value::Matrix(m) => Ok(!m.is_empty() && m.iter().all(|&x| x != 0.0)),
        Value::Str(_) => Err(RuntimeFault::NotLogical("string")),
        Value::Undef => Err(RuntimeFault::UndefinedOperand),
    }
}

/// Echo a binding the way a non-suppressed statement does.
pub fn display_binding(name: &str, v: &Value) {
    println!("{name} = {v}");
}

// ============================================================================
// Tests
// ============================================================================
