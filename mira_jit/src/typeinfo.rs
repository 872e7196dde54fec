//! The type registry: lattice, overload tables and kernel descriptors.
//!
//! Compilation reasons about values through [`TypeId`]s drawn from a small
//! tree-shaped lattice rooted at `any` (the boxed representation). Every
//! operation compiled code may perform is an entry in an overload table:
//! an exact operand-type tuple mapped to the kernel implementing it, its
//! result type and its effect flags. A missing entry is what makes the
//! specializer give up on a loop, so the tables below define precisely the
//! subset of the language that runs natively.
//!
//! The registry is owned by the specializer instance and passed by
//! reference; there is no global state.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use mira_runtime::{BinOp, Value};

/// Operand tuples are almost always unary or binary.
pub type ParamTypes = SmallVec<[TypeId; 2]>;

// ============================================================================
// Types
// ============================================================================

/// Interned handle to a lattice type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(u32);

impl TypeId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Unboxed slot representation of a type, used by marshalling and by the
/// backend's register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReprKind {
    /// Reference-counted `Value`.
    Boxed,
    Scalar,
    Bool,
    Index,
    Range,
    Str,
}

#[derive(Debug)]
struct TypeDesc {
    name: &'static str,
    parent: Option<TypeId>,
    depth: u32,
    repr: ReprKind,
}

// ============================================================================
// Kernels
// ============================================================================

/// Native entry points compiled calls resolve to. The backend gives each a
/// concrete implementation over unboxed slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    /// Scalar arithmetic or comparison.
    BinScalar(BinOp),
    /// Iterator increment (`index + index`).
    AddIndex,
    /// Boxed fallback: dynamic dispatch through the runtime.
    BinBoxed(BinOp),
    /// Iteration protocol over ranges.
    RangeInit,
    RangeCheck,
    RangeElem,
    /// Result is the sole operand, unchanged.
    Identity,
    /// No code at all (releasing an unboxed value).
    Nop,
    GrabBoxed,
    ReleaseBoxed,
    TruthScalar,
    TruthBoxed,
    /// Box an unboxed slot into a `Value`.
    Box_,
    /// Unbox a `Value` into the given representation.
    Unbox(ReprKind),
    /// Echo a named binding.
    Print,
}

// ============================================================================
// Overloads
// ============================================================================

/// One resolvable operation: exact operand types in, kernel and result out.
#[derive(Debug, Clone)]
pub struct Overload {
    pub params: ParamTypes,
    pub result: Option<TypeId>,
    pub kernel: Kernel,
    pub can_error: bool,
    pub side_effects: bool,
}

impl Overload {
    fn pure_fn(params: &[TypeId], result: TypeId, kernel: Kernel) -> Overload {
        Overload {
            params: ParamTypes::from_slice(params),
            result: Some(result),
            kernel,
            can_error: false,
            side_effects: false,
        }
    }

    fn void_fn(params: &[TypeId], kernel: Kernel) -> Overload {
        Overload {
            params: ParamTypes::from_slice(params),
            result: None,
            kernel,
            can_error: false,
            side_effects: false,
        }
    }

    fn erroring(mut self) -> Overload {
        self.can_error = true;
        self
    }

    fn effectful(mut self) -> Overload {
        self.side_effects = true;
        self
    }
}

/// Exact-match dispatch table for one operation name.
#[derive(Debug, Default)]
pub struct OverloadTable {
    overloads: FxHashMap<ParamTypes, Overload>,
}

impl OverloadTable {
    fn add(&mut self, overload: Overload) {
        self.overloads.insert(overload.params.clone(), overload);
    }

    /// Resolve an operand tuple. No subtyping: the tuple must match an
    /// entry exactly, anything else is a miss.
    pub fn lookup(&self, args: &[TypeId]) -> Option<&Overload> {
        self.overloads.get(args)
    }
}

/// Names an overload table in the registry. IR call instructions carry one
/// of these instead of a resolved overload; resolution happens during
/// inference, once operand types are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnRef {
    Binary(BinOp),
    Grab,
    Release,
    ForInit,
    ForCheck,
    ForIndex,
    LogicallyTrue,
    Print,
    /// Conversion into the named destination type.
    Cast(TypeId),
}

// ============================================================================
// Registry
// ============================================================================

/// The registry itself. Construction wires up the full lattice and every
/// overload the backend implements.
pub struct TypeInfo {
    types: Vec<TypeDesc>,
    pub any: TypeId,
    pub scalar: TypeId,
    pub boolean: TypeId,
    pub index: TypeId,
    pub range: TypeId,
    pub string: TypeId,
    binary: FxHashMap<BinOp, OverloadTable>,
    grab: OverloadTable,
    release: OverloadTable,
    for_init: OverloadTable,
    for_check: OverloadTable,
    for_index: OverloadTable,
    logically_true: OverloadTable,
    print: OverloadTable,
    /// Indexed by destination type.
    casts: Vec<OverloadTable>,
}

impl TypeInfo {
    pub fn new() -> TypeInfo {
        let mut types: Vec<TypeDesc> = Vec::new();
        let mut new_type = |types: &mut Vec<TypeDesc>, name, parent: Option<TypeId>, repr| {
            let depth = match parent {
                Some(p) => types[p.index()].depth + 1,
                None => 0,
            };
            let id = TypeId(types.len() as u32);
            types.push(TypeDesc { name, parent, depth, repr });
            id
        };

        let any = new_type(&mut types, "any", None, ReprKind::Boxed);
        let scalar = new_type(&mut types, "scalar", Some(any), ReprKind::Scalar);
        let boolean = new_type(&mut types, "bool", Some(any), ReprKind::Bool);
        let index = new_type(&mut types, "index", Some(any), ReprKind::Index);
        let range = new_type(&mut types, "range", Some(any), ReprKind::Range);
        let string = new_type(&mut types, "string", Some(any), ReprKind::Str);

        let mut ti = TypeInfo {
            types,
            any,
            scalar,
            boolean,
            index,
            range,
            string,
            binary: FxHashMap::default(),
            grab: OverloadTable::default(),
            release: OverloadTable::default(),
            for_init: OverloadTable::default(),
            for_check: OverloadTable::default(),
            for_index: OverloadTable::default(),
            logically_true: OverloadTable::default(),
            print: OverloadTable::default(),
            casts: Vec::new(),
        };
        ti.casts.resize_with(ti.types.len(), OverloadTable::default);
        ti.register_all();
        ti
    }

    fn register_all(&mut self) {
        let (any, scalar, boolean, index, range, string) =
            (self.any, self.scalar, self.boolean, self.index, self.range, self.string);

        // Binary operators. Scalar pairs run natively; boxed pairs fall
        // back to the runtime's dynamic dispatch and may fault.
        for op in BinOp::ALL {
            let table = self.binary.entry(op).or_default();
            let result = if op.is_comparison() { boolean } else { scalar };
            table.add(Overload::pure_fn(&[scalar, scalar], result, Kernel::BinScalar(op)));
            table.add(Overload::pure_fn(&[any, any], any, Kernel::BinBoxed(op)).erroring());
        }
        if let Some(table) = self.binary.get_mut(&BinOp::Add) {
            table.add(Overload::pure_fn(&[index, index], index, Kernel::AddIndex));
        }

        // Reference-count mirroring. Only boxed values carry a count;
        // everything else is a copy or a no-op. A boxed grab faults on an
        // unbound value, like any interpreted read of one.
        self.grab.add(Overload::pure_fn(&[any], any, Kernel::GrabBoxed).erroring());
        self.release.add(Overload::void_fn(&[any], Kernel::ReleaseBoxed));
        for ty in [scalar, boolean, index, range, string] {
            self.grab.add(Overload::pure_fn(&[ty], ty, Kernel::Identity));
            self.release.add(Overload::void_fn(&[ty], Kernel::Nop));
        }

        // Counted-loop iteration protocol.
        self.for_init.add(Overload::pure_fn(&[range], index, Kernel::RangeInit));
        self.for_check.add(Overload::pure_fn(&[range, index], boolean, Kernel::RangeCheck));
        self.for_index.add(Overload::pure_fn(&[range, index], scalar, Kernel::RangeElem));

        // Conditions.
        self.logically_true.add(Overload::pure_fn(&[boolean], boolean, Kernel::Identity));
        self.logically_true.add(Overload::pure_fn(&[scalar], boolean, Kernel::TruthScalar));
        self.logically_true
            .add(Overload::pure_fn(&[any], boolean, Kernel::TruthBoxed).erroring());

        // Statement echo.
        for ty in [any, scalar, boolean, range, string] {
            self.print.add(Overload::void_fn(&[string, ty], Kernel::Print).effectful());
        }

        // Casts, keyed by destination. Boxing always works; unboxing is
        // only registered for representations the guard can vouch for.
        self.casts[any.index()].add(Overload::pure_fn(&[any], any, Kernel::Identity));
        for ty in [scalar, boolean, index, range, string] {
            self.casts[any.index()].add(Overload::pure_fn(&[ty], any, Kernel::Box_));
            self.casts[ty.index()].add(Overload::pure_fn(&[ty], ty, Kernel::Identity));
            let repr = self.types[ty.index()].repr;
            self.casts[ty.index()].add(Overload::pure_fn(&[any], ty, Kernel::Unbox(repr)));
        }
    }

    // ------------------------------------------------------------------
    // Lattice queries
    // ------------------------------------------------------------------

    #[inline]
    pub fn name(&self, ty: TypeId) -> &'static str {
        self.types[ty.index()].name
    }

    #[inline]
    pub fn depth(&self, ty: TypeId) -> u32 {
        self.types[ty.index()].depth
    }

    #[inline]
    pub fn repr(&self, ty: TypeId) -> ReprKind {
        self.types[ty.index()].repr
    }

    fn parent(&self, ty: TypeId) -> Option<TypeId> {
        self.types[ty.index()].parent
    }

    /// Least upper bound of two types: walk the deeper side up until the
    /// paths meet. Commutative, idempotent, and `any` absorbs everything.
    pub fn join(&self, a: TypeId, b: TypeId) -> TypeId {
        let (mut a, mut b) = (a, b);
        while a != b {
            if self.depth(a) > self.depth(b) {
                a = self.parent(a).unwrap_or(self.any);
            } else if self.depth(b) > self.depth(a) {
                b = self.parent(b).unwrap_or(self.any);
            } else {
                a = self.parent(a).unwrap_or(self.any);
                b = self.parent(b).unwrap_or(self.any);
            }
        }
        a
    }

    /// Join that treats an untyped side as neutral.
    pub fn join_opt(&self, a: Option<TypeId>, b: Option<TypeId>) -> Option<TypeId> {
        match (a, b) {
            (Some(a), Some(b)) => Some(self.join(a, b)),
            (Some(t), None) | (None, Some(t)) => Some(t),
            (None, None) => None,
        }
    }

    /// The lattice type an interpreter value specializes to. `None` means
    /// the value is outside the model entirely and the caller must not
    /// compile against it.
    pub fn type_of(&self, v: &Value) -> Option<TypeId> {
        match v {
            Value::Scalar(_) => Some(self.scalar),
            Value::Bool(_) => Some(self.boolean),
            Value::Range(_) => Some(self.range),
            Value::Index(_) => Some(self.index),
            // Boxed payloads, and unbound slots, specialize as `any`.
            Value::Matrix(_) | Value::Str(_) | Value::Undef => Some(self.any),
        }
    }

    // ------------------------------------------------------------------
    // Overload resolution
    // ------------------------------------------------------------------

    pub fn table(&self, f: FnRef) -> Option<&OverloadTable> {
        match f {
            FnRef::Binary(op) => self.binary.get(&op),
            FnRef::Grab => Some(&self.grab),
            FnRef::Release => Some(&self.release),
            FnRef::ForInit => Some(&self.for_init),
            FnRef::ForCheck => Some(&self.for_check),
            FnRef::ForIndex => Some(&self.for_index),
            FnRef::LogicallyTrue => Some(&self.logically_true),
            FnRef::Print => Some(&self.print),
            FnRef::Cast(dest) => self.casts.get(dest.index()),
        }
    }

    pub fn lookup(&self, f: FnRef, args: &[TypeId]) -> Option<&Overload> {
        self.table(f)?.lookup(args)
    }

    pub fn fn_name(&self, f: FnRef) -> String {
        match f {
            FnRef::Binary(op) => format!("binary {}", op.symbol()),
            FnRef::Grab => "grab".into(),
            FnRef::Release => "release".into(),
            FnRef::ForInit => "for_init".into(),
            FnRef::ForCheck => "for_check".into(),
            FnRef::ForIndex => "for_index".into(),
            FnRef::LogicallyTrue => "logically_true".into(),
            FnRef::Print => "print".into(),
            FnRef::Cast(dest) => format!("cast<{}>", self.name(dest)),
        }
    }
}

impl Default for TypeInfo {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
