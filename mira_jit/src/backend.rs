//! Execution backend: a flat register program over unboxed slots.
//!
//! Lowering produces a [`Program`]: straight-line ops with explicit jumps,
//! one virtual register per SSA value plus whatever temporaries phi
//! shuffling needed. Kernels are exact: every op was resolved against the
//! registry at compile time, so the interpreter loop here does no dynamic
//! dispatch beyond the boxed fallback kernels, which route through the
//! runtime the same way the tree walker does. That shared routing is what
//! keeps compiled and interpreted results bit-identical.
//!
//! Argument slots are marshalled by the caller into a `&mut [Value]`
//! buffer; `Extract` and `Store` ops move between that buffer and the
//! register file.

use smallvec::SmallVec;

use mira_runtime::{binary_op, display_binding, is_true, Range, RuntimeFault, Value};

use crate::ir::graph::Constant;
use crate::typeinfo::{Kernel, ReprKind};

pub type Reg = u32;

/// One virtual register. `Empty` marks both never-written registers and
/// boxed values whose last reference was released.
#[derive(Debug, Clone, Default)]
pub enum Slot {
    #[default]
    Empty,
    Scalar(f64),
    Bool(bool),
    Index(i64),
    Range(Range),
    Str(std::rc::Rc<str>),
    Boxed(Value),
}

#[derive(Debug, Clone)]
pub enum Op {
    Const {
        dst: Reg,
        value: Constant,
    },
    /// Load argument slot `arg` into a register, checking it still has the
    /// representation the signature promised.
    Extract {
        dst: Reg,
        arg: u16,
        repr: ReprKind,
    },
    /// Write a register back into argument slot `arg`.
    Store {
        arg: u16,
        src: Reg,
    },
    Copy {
        dst: Reg,
        src: Reg,
    },
    Call {
        kernel: Kernel,
        args: SmallVec<[Reg; 2]>,
        dst: Option<Reg>,
    },
    Jump {
        target: usize,
    },
    Branch {
        cond: Reg,
        then_: usize,
        else_: usize,
    },
    Finish,
}

#[derive(Debug)]
pub struct Program {
    pub ops: Vec<Op>,
    pub num_regs: u32,
}

/// A compiled loop body, ready to run against a marshalled argument buffer.
#[derive(Debug)]
pub struct NativeFunction {
    program: Program,
}

impl NativeFunction {
    pub fn new(program: Program) -> NativeFunction {
        NativeFunction { program }
    }

    pub fn num_ops(&self) -> usize {
        self.program.ops.len()
    }

    /// Run to completion. `args` is read by `Extract` ops and written by
    /// `Store` ops; a faulting kernel aborts with the slots written so far
    /// intact, and the caller decides what to do with them.
    pub fn invoke(&self, args: &mut [Value]) -> Result<(), RuntimeFault> {
        let mut regs: Vec<Slot> = vec![Slot::Empty; self.program.num_regs as usize];
        let mut pc = 0usize;
        loop {
            match &self.program.ops[pc] {
                Op::Const { dst, value } => {
                    regs[*dst as usize] = slot_of_constant(value);
                }
                Op::Extract { dst, arg, repr } => {
                    regs[*dst as usize] = extract(&args[*arg as usize], *repr)?;
                }
                Op::Store { arg, src } => {
                    args[*arg as usize] = box_slot(&regs[*src as usize]);
                }
                Op::Copy { dst, src } => {
                    regs[*dst as usize] = regs[*src as usize].clone();
                }
                Op::Call { kernel, args: ops, dst } => {
                    let result = run_kernel(*kernel, ops, &mut regs)?;
                    if let Some(dst) = dst {
                        regs[*dst as usize] = result;
                    }
                }
                Op::Jump { target } => {
                    pc = *target;
                    continue;
                }
                Op::Branch { cond, then_, else_ } => {
                    pc = match regs[*cond as usize] {
                        Slot::Bool(true) => *then_,
                        Slot::Bool(false) => *else_,
                        _ => return Err(RuntimeFault::Internal("branch on non-bool")),
                    };
                    continue;
                }
                Op::Finish => return Ok(()),
            }
            pc += 1;
        }
    }
}

fn slot_of_constant(c: &Constant) -> Slot {
    match c {
        Constant::Scalar(x) => Slot::Scalar(*x),
        Constant::Bool(b) => Slot::Bool(*b),
        Constant::Index(i) => Slot::Index(*i),
        Constant::Range(r) => Slot::Range(*r),
        Constant::Str(s) => Slot::Str(s.clone()),
    }
}

fn extract(v: &Value, repr: ReprKind) -> Result<Slot, RuntimeFault> {
    match (repr, v) {
        (ReprKind::Boxed, v) => Ok(Slot::Boxed(v.clone())),
        (ReprKind::Scalar, Value::Scalar(x)) => Ok(Slot::Scalar(*x)),
        (ReprKind::Bool, Value::Bool(b)) => Ok(Slot::Bool(*b)),
        (ReprKind::Index, Value::Index(i)) => Ok(Slot::Index(*i)),
        (ReprKind::Range, Value::Range(r)) => Ok(Slot::Range(*r)),
        (ReprKind::Str, Value::Str(s)) => Ok(Slot::Str(s.clone())),
        _ => Err(RuntimeFault::Internal("argument drifted from its signature")),
    }
}

/// Re-box a slot for the argument buffer or a boxed register. `Empty`
/// boxes as `Undef`, which marshalling treats as "do not write back".
fn box_slot(slot: &Slot) -> Value {
    match slot {
        Slot::Empty => Value::Undef,
        Slot::Scalar(x) => Value::Scalar(*x),
        Slot::Bool(b) => Value::Bool(*b),
        Slot::Index(i) => Value::Index(*i),
        Slot::Range(r) => Value::Range(*r),
        Slot::Str(s) => Value::Str(s.clone()),
        Slot::Boxed(v) => v.clone(),
    }
}

fn scalar_of(slot: &Slot) -> Result<f64, RuntimeFault> {
    match slot {
        Slot::Scalar(x) => Ok(*x),
        _ => Err(RuntimeFault::Internal("expected scalar register")),
    }
}

fn index_of(slot: &Slot) -> Result<i64, RuntimeFault> {
    match slot {
        Slot::Index(i) => Ok(*i),
        _ => Err(RuntimeFault::Internal("expected index register")),
    }
}

fn range_of(slot: &Slot) -> Result<Range, RuntimeFault> {
    match slot {
        Slot::Range(r) => Ok(*r),
        _ => Err(RuntimeFault::Internal("expected range register")),
    }
}

fn boxed_of(slot: &Slot) -> Result<Value, RuntimeFault> {
    match slot {
        Slot::Boxed(v) => Ok(v.clone()),
        _ => Err(RuntimeFault::Internal("expected boxed register")),
    }
}

fn slot_of_value(v: Value) -> Slot {
    // Dynamic results stay boxed; narrowing them again is the cast
    // machinery's job, not the kernel's.
    Slot::Boxed(v)
}

fn run_kernel(
    kernel: Kernel,
    args: &SmallVec<[Reg; 2]>,
    regs: &mut [Slot],
) -> Result<Slot, RuntimeFault> {
    // the only kernel that writes a register in place
    if kernel == Kernel::ReleaseBoxed {
        regs[args[0] as usize] = Slot::Empty;
        return Ok(Slot::Empty);
    }
    let arg = |n: usize| &regs[args[n] as usize];
    match kernel {
        Kernel::BinScalar(op) => {
            let (a, b) = (scalar_of(arg(0))?, scalar_of(arg(1))?);
            match op.apply_f64(a, b) {
                Value::Scalar(x) => Ok(Slot::Scalar(x)),
                Value::Bool(b) => Ok(Slot::Bool(b)),
                _ => Err(RuntimeFault::Internal("scalar kernel produced odd value")),
            }
        }
        Kernel::AddIndex => {
            let (a, b) = (index_of(arg(0))?, index_of(arg(1))?);
            Ok(Slot::Index(a + b))
        }
        Kernel::BinBoxed(op) => {
            let (a, b) = (boxed_of(arg(0))?, boxed_of(arg(1))?);
            Ok(slot_of_value(binary_op(op, &a, &b)?))
        }
        Kernel::RangeInit => {
            range_of(arg(0))?;
            Ok(Slot::Index(0))
        }
        Kernel::RangeCheck => {
            let (r, i) = (range_of(arg(0))?, index_of(arg(1))?);
            Ok(Slot::Bool(i < r.nelem()))
        }
        Kernel::RangeElem => {
            let (r, i) = (range_of(arg(0))?, index_of(arg(1))?);
            Ok(Slot::Scalar(r.elem(i)))
        }
        Kernel::Identity => Ok(arg(0).clone()),
        Kernel::Nop => Ok(Slot::Empty),
        Kernel::GrabBoxed => {
            // A boxed read of a never-bound capture; the interpreter
            // faults on such a read too.
            let v = boxed_of(arg(0))?;
            if v.is_undef() {
                return Err(RuntimeFault::UndefinedOperand);
            }
            Ok(Slot::Boxed(v))
        }
        Kernel::ReleaseBoxed => unreachable!("handled above"),
        Kernel::TruthScalar => Ok(Slot::Bool(scalar_of(arg(0))? != 0.0)),
        Kernel::TruthBoxed => {
            let v = boxed_of(arg(0))?;
            Ok(Slot::Bool(is_true(&v)?))
        }
        Kernel::Box_ => Ok(Slot::Boxed(box_slot(arg(0)))),
        Kernel::Unbox(repr) => {
            let v = boxed_of(arg(0))?;
            extract(&v, repr)
        }
        Kernel::Print => {
            let name = match arg(0) {
                Slot::Str(s) => s.clone(),
                _ => return Err(RuntimeFault::Internal("print without a name")),
            };
            let value = box_slot(arg(1));
            display_binding(&name, &value);
            Ok(Slot::Empty)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
