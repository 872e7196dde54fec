//! Lowering from typed SSA to the register program.
//!
//! Every SSA value gets a virtual register; blocks are lowered in creation
//! order into per-block op chunks that are concatenated and patched at the
//! end. Calls are re-resolved against the registry (inference already
//! proved the lookups succeed for live values) and lowered to their
//! kernels; `Identity` becomes a register copy and `Nop` disappears.
//!
//! Phis are destructed on the incoming edges. A jump edge gets its copies
//! inline before the jump; a branch edge gets a fresh chunk holding the
//! copies and a jump, and the branch is retargeted at it. Copies into a
//! phi go through the cast table when the operand's type is narrower than
//! the phi's, and all copies for one edge are staged through temporaries
//! so phis can permute freely.

use rustc_hash::FxHashMap;
use smallvec::{smallvec, SmallVec};

use crate::backend::{Op, Program, Reg};
use crate::convert::SsaResult;
use crate::error::Bailout;
use crate::ir::graph::{BlockId, Graph, ValueId, ValueKind};
use crate::typeinfo::{FnRef, Kernel, ParamTypes, TypeInfo};

pub fn lower(ti: &TypeInfo, ssa: &SsaResult) -> Result<Program, Bailout> {
    let lowering = Lowering {
        ti,
        graph: &ssa.graph,
        regs: FxHashMap::default(),
        next_reg: 0,
        chunks: Vec::new(),
    };
    lowering.run()
}

struct Lowering<'a> {
    ti: &'a TypeInfo,
    graph: &'a Graph,
    regs: FxHashMap<ValueId, Reg>,
    next_reg: Reg,
    /// Op sequences indexed by jump target: one per block, then one per
    /// branch edge that needed phi copies.
    chunks: Vec<Vec<Op>>,
}

impl<'a> Lowering<'a> {
    fn run(mut self) -> Result<Program, Bailout> {
        self.chunks = (0..self.graph.num_blocks()).map(|_| Vec::new()).collect();

        for b in self.graph.block_ids() {
            let mut ops = Vec::new();
            let mut terminated = false;
            for &v in &self.graph.block(b).insts {
                match &self.graph.value(v).kind {
                    ValueKind::Const(c) => {
                        let dst = self.reg(v);
                        ops.push(Op::Const { dst, value: c.clone() });
                    }
                    ValueKind::ExtractArg(n) => {
                        if self.graph.use_count(v) == 0 {
                            continue;
                        }
                        let ty = self.graph.ty(v).ok_or(Bailout::Untyped)?;
                        let dst = self.reg(v);
                        ops.push(Op::Extract { dst, arg: *n, repr: self.ti.repr(ty) });
                    }
                    ValueKind::StoreArg(n) => {
                        let src = self.reg(self.graph.value(v).args[0]);
                        ops.push(Op::Store { arg: *n, src });
                    }
                    ValueKind::Assign => {
                        let src = self.reg(self.graph.value(v).args[0]);
                        let dst = self.reg(v);
                        ops.push(Op::Copy { dst, src });
                    }
                    // Materialized by copies on the incoming edges.
                    ValueKind::Phi => {
                        self.reg(v);
                    }
                    ValueKind::Call(f) => self.lower_call(v, *f, &mut ops)?,
                    ValueKind::Jump { target } => {
                        self.phi_copies(&mut ops, b, *target)?;
                        ops.push(Op::Jump { target: target.as_usize() });
                        terminated = true;
                    }
                    ValueKind::Branch { then_, else_ } => {
                        let cond = self.reg(self.graph.value(v).args[0]);
                        let t = self.edge_target(b, *then_)?;
                        let e = self.edge_target(b, *else_)?;
                        ops.push(Op::Branch { cond, then_: t, else_: e });
                        terminated = true;
                    }
                    ValueKind::Var(name) => {
                        return Err(Bailout::Internal(format!("placeholder '{name}' survived")));
                    }
                }
            }
            if !terminated {
                ops.push(Op::Finish);
            }
            self.chunks[b.as_usize()] = ops;
        }

        Ok(self.link())
    }

    fn reg(&mut self, v: ValueId) -> Reg {
        if let Some(&r) = self.regs.get(&v) {
            return r;
        }
        let r = self.next_reg;
        self.next_reg += 1;
        self.regs.insert(v, r);
        r
    }

    fn fresh(&mut self) -> Reg {
        let r = self.next_reg;
        self.next_reg += 1;
        r
    }

    fn lower_call(&mut self, v: ValueId, f: FnRef, ops: &mut Vec<Op>) -> Result<(), Bailout> {
        let data = self.graph.value(v);
        let mut params = ParamTypes::new();
        for &arg in data.args.iter() {
            params.push(self.graph.ty(arg).ok_or(Bailout::Untyped)?);
        }
        let overload = self.ti.lookup(f, &params).ok_or_else(|| Bailout::MissingOverload {
            fn_name: self.ti.fn_name(f),
            arg_types: params.iter().map(|&t| self.ti.name(t)).collect::<Vec<_>>().join(", "),
        })?;

        match overload.kernel {
            Kernel::Nop => {}
            Kernel::Identity => {
                if self.graph.use_count(v) > 0 {
                    let src = self.reg(data.args[0]);
                    let dst = self.reg(v);
                    ops.push(Op::Copy { dst, src });
                }
            }
            kernel => {
                let args: SmallVec<[Reg; 2]> =
                    data.args.iter().map(|&a| self.reg(a)).collect();
                let dst = match overload.result {
                    Some(_) => Some(self.reg(v)),
                    None => None,
                };
                ops.push(Op::Call { kernel, args, dst });
            }
        }
        Ok(())
    }

    /// Jump target for the edge `from -> to`: the block itself when it has
    /// no phis, otherwise a fresh chunk holding the edge's copies.
    fn edge_target(&mut self, from: BlockId, to: BlockId) -> Result<usize, Bailout> {
        let has_phis = self.graph.block(to).insts.iter().any(|&v| self.graph.value(v).is_phi());
        if !has_phis {
            return Ok(to.as_usize());
        }
        let mut ops = Vec::new();
        self.phi_copies(&mut ops, from, to)?;
        ops.push(Op::Jump { target: to.as_usize() });
        self.chunks.push(ops);
        Ok(self.chunks.len() - 1)
    }

    /// Copies for the phis of `to` along the edge from `from`, staged
    /// through temporaries so the copies act in parallel.
    fn phi_copies(&mut self, ops: &mut Vec<Op>, from: BlockId, to: BlockId) -> Result<(), Bailout> {
        let pidx = self
            .graph
            .pred_index(to, from)
            .ok_or_else(|| Bailout::Internal(format!("{from:?} is not a predecessor of {to:?}")))?;

        let mut pairs: Vec<(Reg, Reg)> = Vec::new();
        for &phi in &self.graph.block(to).insts {
            if !self.graph.value(phi).is_phi() {
                continue;
            }
            let src = self.graph.value(phi).args[pidx];
            let src_ty = self.graph.ty(src).ok_or(Bailout::Untyped)?;
            let phi_ty = self.graph.ty(phi).ok_or(Bailout::Untyped)?;
            let mut src_reg = self.reg(src);
            if src_ty != phi_ty {
                let cast = self.ti.lookup(FnRef::Cast(phi_ty), &[src_ty]).ok_or_else(|| {
                    Bailout::MissingOverload {
                        fn_name: self.ti.fn_name(FnRef::Cast(phi_ty)),
                        arg_types: self.ti.name(src_ty).to_owned(),
                    }
                })?;
                if cast.kernel != Kernel::Identity {
                    let tmp = self.fresh();
                    ops.push(Op::Call {
                        kernel: cast.kernel,
                        args: smallvec![src_reg],
                        dst: Some(tmp),
                    });
                    src_reg = tmp;
                }
            }
            pairs.push((self.reg(phi), src_reg));
        }

        if let [(dst, src)] = pairs[..] {
            if dst != src {
                ops.push(Op::Copy { dst, src });
            }
            return Ok(());
        }
        let staged: Vec<Reg> = pairs
            .iter()
            .map(|&(_, src)| {
                let tmp = self.fresh();
                ops.push(Op::Copy { dst: tmp, src });
                tmp
            })
            .collect();
        for (&(dst, _), &tmp) in pairs.iter().zip(&staged) {
            ops.push(Op::Copy { dst, src: tmp });
        }
        Ok(())
    }

    /// Concatenate the chunks and rewrite chunk-index targets into op
    /// offsets.
    fn link(self) -> Program {
        let mut offsets = Vec::with_capacity(self.chunks.len());
        let mut total = 0;
        for chunk in &self.chunks {
            offsets.push(total);
            total += chunk.len();
        }
        let mut ops = Vec::with_capacity(total);
        for chunk in self.chunks {
            for op in chunk {
                ops.push(match op {
                    Op::Jump { target } => Op::Jump { target: offsets[target] },
                    Op::Branch { cond, then_, else_ } => Op::Branch {
                        cond,
                        then_: offsets[then_],
                        else_: offsets[else_],
                    },
                    other => other,
                });
            }
        }
        Program { ops, num_regs: self.next_reg }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NativeFunction;
    use crate::{convert, infer};
    use mira_parser::{AstBuilder, ForStmt, Stmt, StmtKind};
    use mira_runtime::{BinOp, Scope, Value};

    fn for_of(stmt: Stmt) -> ForStmt {
        match stmt.kind {
            StmtKind::For(f) => *f,
            _ => panic!("expected for"),
        }
    }

    /// Full pipeline against a scope; returns the marshalled buffer after
    /// one invocation plus the capture names.
    fn compile_and_run(scope: &Scope, f: &ForStmt) -> (Vec<String>, Vec<Value>) {
        let ti = TypeInfo::new();
        let mut ssa = convert::build(&ti, scope, f).expect("convert");
        infer::infer(&ti, &mut ssa.graph).expect("infer");
        let program = lower(&ti, &ssa).expect("lower");
        let function = NativeFunction::new(program);

        let names: Vec<String> = ssa.args.iter().map(|s| s.name.clone()).collect();
        let mut buf: Vec<Value> = ssa
            .args
            .iter()
            .map(|s| scope.get(&s.name).cloned().unwrap_or(Value::Undef))
            .collect();
        function.invoke(&mut buf).expect("invoke");
        (names, buf)
    }

    fn slot<'a>(names: &[String], buf: &'a [Value], name: &str) -> &'a Value {
        let i = names.iter().position(|n| n == name).expect("capture");
        &buf[i]
    }

    #[test]
    fn accumulating_loop_runs_natively() {
        // a = 2; for i = 1:5 { b = a + i }
        let mut b = AstBuilder::new();
        let f = for_of(b.for_stmt(
            "i",
            b.range(1.0, 5.0),
            vec![b.assign("b", b.binary(BinOp::Add, b.ident("a"), b.ident("i")))],
        ));
        let mut scope = Scope::new();
        scope.set("a", Value::Scalar(2.0));

        let (names, buf) = compile_and_run(&scope, &f);
        assert_eq!(slot(&names, &buf, "b"), &Value::Scalar(7.0));
        assert_eq!(slot(&names, &buf, "i"), &Value::Scalar(5.0));
        assert_eq!(slot(&names, &buf, "a"), &Value::Scalar(2.0));
    }

    #[test]
    fn zero_trip_loop_leaves_captures_undefined() {
        let mut b = AstBuilder::new();
        let f = for_of(b.for_stmt(
            "i",
            b.ident("r"),
            vec![b.assign("b", b.binary(BinOp::Add, b.ident("i"), b.num(1.0)))],
        ));
        let mut scope = Scope::new();
        scope.set("r", Value::range(1.0, 0.0, 1.0));

        let (names, buf) = compile_and_run(&scope, &f);
        // never-written captures come back undefined so marshalling skips them
        assert!(slot(&names, &buf, "b").is_undef());
        assert!(slot(&names, &buf, "i").is_undef());
    }

    #[test]
    fn conditional_in_body() {
        // c = 0; for i = 1:5 { if i > 3 { c = c + i } else { c = c - 1 } }
        let mut b = AstBuilder::new();
        let then_ = b.clause(
            b.binary(BinOp::Gt, b.ident("i"), b.num(3.0)),
            vec![b.assign("c", b.binary(BinOp::Add, b.ident("c"), b.ident("i")))],
        );
        let else_ = b.else_clause(vec![b.assign("c", b.binary(BinOp::Sub, b.ident("c"), b.num(1.0)))]);
        let f = for_of(b.for_stmt(
            "i",
            b.range(1.0, 5.0),
            vec![b.if_stmt(vec![then_, else_])],
        ));
        let mut scope = Scope::new();
        scope.set("c", Value::Scalar(0.0));

        let (names, buf) = compile_and_run(&scope, &f);
        // 0 -1 -2 -3 +4 +5 = 6
        assert_eq!(slot(&names, &buf, "c"), &Value::Scalar(6.0));
    }

    #[test]
    fn boxed_operands_round_through_the_runtime() {
        // s = s + m elementwise, via the boxed fallback kernel
        let mut b = AstBuilder::new();
        let f = for_of(b.for_stmt(
            "i",
            b.range(1.0, 2.0),
            vec![b.assign("s", b.binary(BinOp::Add, b.ident("s"), b.ident("m")))],
        ));
        let mut scope = Scope::new();
        scope.set("m", Value::matrix(vec![1.0, 2.0]));
        scope.set("s", Value::matrix(vec![0.0, 0.0]));

        let (names, buf) = compile_and_run(&scope, &f);
        assert_eq!(slot(&names, &buf, "s"), &Value::matrix(vec![2.0, 4.0]));
    }

    #[test]
    fn matrix_capture_refcount_is_neutral() {
        let mut b = AstBuilder::new();
        let f = for_of(b.for_stmt(
            "i",
            b.range(1.0, 3.0),
            vec![b.assign("c", b.binary(BinOp::Add, b.ident("m"), b.ident("m")))],
        ));
        let mut scope = Scope::new();
        scope.set("m", Value::matrix(vec![1.0, 2.0]));

        let before = scope.get("m").and_then(Value::strong_count);
        let (names, buf) = compile_and_run(&scope, &f);
        assert_eq!(slot(&names, &buf, "c"), &Value::matrix(vec![2.0, 4.0]));
        drop(buf);
        assert_eq!(scope.get("m").and_then(Value::strong_count), before);
    }
}
