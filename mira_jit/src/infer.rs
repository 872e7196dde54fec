//! Worklist type inference over the SSA graph.
//!
//! Constants and argument extracts are typed at creation; everything else
//! starts untyped. The worklist propagates forward: assigns copy their
//! operand's type, calls resolve against the registry once all operands
//! are typed, and phis join whatever operands are typed so far (deferring
//! the rest, which is what lets loop-carried values settle). Types only
//! climb the lattice, so the ascent terminates; an explicit budget turns a
//! defect here into a bailout instead of a hang.
//!
//! A call whose operand tuple has no overload fails the whole compilation
//! if its result is live. Dead results (releases, prints) are allowed to
//! stay unresolved; lowering will still refuse them if they survive to
//! codegen.

use crate::error::Bailout;
use crate::ir::graph::{Graph, ValueId, ValueKind};
use crate::typeinfo::{TypeId, TypeInfo};

/// Pops allowed per value before declaring divergence.
const BUDGET_PER_VALUE: usize = 50;

pub fn infer(ti: &TypeInfo, graph: &mut Graph) -> Result<(), Bailout> {
    let mut worklist: Vec<ValueId> = Vec::new();
    for v in graph.value_ids() {
        if graph.ty(v).is_some() {
            for u in graph.uses(v) {
                worklist.push(u.user);
            }
        }
    }

    let mut budget = BUDGET_PER_VALUE * (graph.num_values() + 1);
    while let Some(v) = worklist.pop() {
        if budget == 0 {
            return Err(Bailout::InferenceDiverged);
        }
        budget -= 1;

        let computed = infer_one(ti, graph, v)?;
        let Some(ty) = computed else { continue };
        if graph.ty(v) == Some(ty) {
            continue;
        }
        graph.set_ty(v, ty);
        for u in graph.uses(v) {
            worklist.push(u.user);
        }
    }

    validate(graph)
}

fn infer_one(ti: &TypeInfo, graph: &Graph, v: ValueId) -> Result<Option<TypeId>, Bailout> {
    let data = graph.value(v);
    match &data.kind {
        ValueKind::Assign => Ok(graph.ty(data.args[0])),
        ValueKind::Phi => {
            let mut joined = None;
            for &arg in data.args.iter() {
                joined = ti.join_opt(joined, graph.ty(arg));
            }
            Ok(joined)
        }
        ValueKind::Call(f) => {
            let mut params = crate::typeinfo::ParamTypes::new();
            for &arg in data.args.iter() {
                match graph.ty(arg) {
                    Some(t) => params.push(t),
                    None => return Ok(None), // operands not settled yet
                }
            }
            match ti.lookup(*f, &params) {
                Some(overload) => Ok(overload.result),
                None if graph.use_count(v) > 0 => Err(Bailout::MissingOverload {
                    fn_name: ti.fn_name(*f),
                    arg_types: params
                        .iter()
                        .map(|&t| ti.name(t))
                        .collect::<Vec<_>>()
                        .join(", "),
                }),
                None => Ok(None),
            }
        }
        // Typed at creation, or inherently void.
        _ => Ok(None),
    }
}

/// Every operand of a placed instruction must be typed once the worklist
/// settles; anything else would reach codegen without a representation.
fn validate(graph: &Graph) -> Result<(), Bailout> {
    for b in graph.block_ids() {
        for &v in &graph.block(b).insts {
            for &arg in graph.value(v).args.iter() {
                if graph.ty(arg).is_none() {
                    return Err(Bailout::Untyped);
                }
            }
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert;
    use mira_parser::{AstBuilder, ForStmt, StmtKind};
    use mira_runtime::{BinOp, Scope, Value};

    fn for_of(stmt: mira_parser::Stmt) -> ForStmt {
        match stmt.kind {
            StmtKind::For(f) => *f,
            _ => panic!("expected for"),
        }
    }

    fn infer_loop(scope: &Scope, f: &ForStmt) -> Result<(convert::SsaResult, TypeInfo), Bailout> {
        let ti = TypeInfo::new();
        let mut ssa = convert::build(&ti, scope, f)?;
        infer(&ti, &mut ssa.graph)?;
        Ok((ssa, ti))
    }

    #[test]
    fn scalar_loop_types_settle() {
        let mut b = AstBuilder::new();
        let f = for_of(b.for_stmt(
            "i",
            b.range(1.0, 5.0),
            vec![b.assign("b", b.binary(BinOp::Add, b.ident("a"), b.ident("i")))],
        ));
        let mut scope = Scope::new();
        scope.set("a", Value::Scalar(2.0));
        let (ssa, ti) = infer_loop(&scope, &f).expect("infer");

        // the value stored back for `b` is the scalar sum
        let store_b = ssa
            .graph
            .block_ids()
            .flat_map(|blk| ssa.graph.block(blk).insts.clone())
            .find(|&v| ssa.graph.value(v).kind == ValueKind::StoreArg(2))
            .expect("store for b");
        let stored = ssa.graph.value(store_b).args[0];
        assert_eq!(ssa.graph.ty(stored), Some(ti.scalar));
    }

    #[test]
    fn phi_joins_to_boxed_when_paths_disagree() {
        // `b` is unbound before the loop, so the entry extract is boxed
        // while the body assigns scalars; their merge must widen.
        let mut b = AstBuilder::new();
        let f = for_of(b.for_stmt(
            "i",
            b.range(1.0, 5.0),
            vec![b.assign("b", b.binary(BinOp::Add, b.ident("a"), b.ident("i")))],
        ));
        let mut scope = Scope::new();
        scope.set("a", Value::Scalar(2.0));
        let (ssa, ti) = infer_loop(&scope, &f).expect("infer");

        let b_var = ssa.args.iter().find(|s| s.name == "b").expect("slot").var;
        let widened = ssa
            .graph
            .value_ids()
            .filter(|&v| {
                ssa.graph.value(v).is_phi() && ssa.graph.value(v).tag == Some(b_var)
            })
            .any(|v| ssa.graph.ty(v) == Some(ti.any));
        assert!(widened, "boxed/scalar merge must join to any");
    }

    #[test]
    fn matrix_bound_has_no_iteration_overload() {
        let mut b = AstBuilder::new();
        let f = for_of(b.for_stmt("i", b.ident("m"), vec![]));
        let mut scope = Scope::new();
        scope.set("m", Value::matrix(vec![1.0, 2.0]));
        match infer_loop(&scope, &f) {
            Err(Bailout::MissingOverload { fn_name, .. }) => {
                assert_eq!(fn_name, "for_init");
            }
            other => panic!("expected missing overload, got {:?}", other.err()),
        }
    }

    #[test]
    fn string_operand_in_arithmetic_bails() {
        let mut b = AstBuilder::new();
        let f = for_of(b.for_stmt(
            "i",
            b.range(1.0, 3.0),
            vec![b.assign("x", b.binary(BinOp::Add, b.ident("s"), b.num(1.0)))],
        ));
        let mut scope = Scope::new();
        scope.set("s", Value::str("oops"));
        // s extracts as boxed but the constant is scalar: (any, scalar)
        // has no overload.
        assert!(matches!(
            infer_loop(&scope, &f).err(),
            Some(Bailout::MissingOverload { .. })
        ));
    }
}
