//! AST to SSA conversion.
//!
//! [`build`] takes one counted `for` loop plus the live scope and produces
//! a typed-but-not-yet-inferred SSA graph, or a [`Bailout`] naming the
//! first unsupported construct it ran into.
//!
//! Conversion runs in two phases:
//!
//! 1. A syntax walk lays out the block skeleton. Variable reads and writes
//!    go through `Var` placeholder values; every referenced user variable
//!    gets an `ExtractArg` in the entry block and a `StoreArg` in the final
//!    block, which is all the marshalling contract the compiled function
//!    has. Identifier reads are wrapped in `grab` calls and redefinitions
//!    get a `release` of the shadowed value, mirroring what interpretation
//!    does to reference counts.
//! 2. SSA construction proper: phis are placed as a fixpoint over the
//!    dominance frontiers of each variable's def/use blocks, then a
//!    dominator-tree walk with per-variable value stacks renames every
//!    placeholder operand to a real definition and fills phi operands per
//!    predecessor.
//!
//! Loop skeleton: the entry of a loop evaluates the bound and `for_init`;
//! a conditional branch on `for_check` guards the body; the body computes
//! `for_index`, binds the loop variable and runs the user statements; an
//! increment block advances the iterator and re-checks. When the bound is
//! a constant, provably non-empty range the first check is skipped and the
//! prelude jumps straight into the body.

use rustc_hash::FxHashMap;

use mira_parser::{Expr, ForStmt, IfStmt, Stmt, StmtKind};
use mira_runtime::{BinOp, Scope, Value};

use crate::error::Bailout;
use crate::ir::arena::SecondaryMap;
use crate::ir::dom::DomTree;
use crate::ir::graph::{BlockId, Constant, Graph, ValueData, ValueId, ValueKind};
use crate::typeinfo::{FnRef, TypeId, TypeInfo};

// ============================================================================
// Results
// ============================================================================

/// One captured variable: its marshalling slot and the type observed when
/// conversion sampled the scope.
#[derive(Debug)]
pub struct ArgSlot {
    pub name: String,
    /// The `Var` placeholder for this variable.
    pub var: ValueId,
    /// Its entry-block extract.
    pub extract: ValueId,
    /// Type the extract was given, from the scope at conversion time.
    pub ty: TypeId,
}

pub struct SsaResult {
    pub graph: Graph,
    pub entry: BlockId,
    pub args: Vec<ArgSlot>,
}

/// Convert `stmt` against the bindings in `scope`.
pub fn build(ti: &TypeInfo, scope: &Scope, stmt: &ForStmt) -> Result<SsaResult, Bailout> {
    let mut graph = Graph::new();
    let entry = graph.add_block("entry");
    let prelude = graph.add_block("prelude");
    let mut conv = Converter {
        ti,
        scope,
        graph,
        entry,
        block: prelude,
        vmap: FxHashMap::default(),
        vars: Vec::new(),
        args: Vec::new(),
        iter_count: 0,
    };

    conv.visit_for(stmt)?;

    // Marshal every captured variable back out.
    let final_block = conv.graph.add_block("final");
    let j = conv.graph.jump(final_block);
    conv.graph.append(conv.block, j);
    conv.block = final_block;
    for i in 0..conv.args.len() {
        let var = conv.args[i].var;
        let store = conv.graph.store_arg(i as u16, var);
        conv.graph.append(final_block, store);
    }

    let j = conv.graph.jump(prelude);
    conv.graph.append(entry, j);

    conv.construct_ssa()?;

    let Converter { graph, args, .. } = conv;
    Ok(SsaResult { graph, entry, args })
}

// ============================================================================
// Converter
// ============================================================================

struct Converter<'a> {
    ti: &'a TypeInfo,
    scope: &'a Scope,
    graph: Graph,
    entry: BlockId,
    /// Block currently receiving instructions.
    block: BlockId,
    vmap: FxHashMap<String, ValueId>,
    /// All variables in creation order, iterator temporaries included.
    vars: Vec<ValueId>,
    args: Vec<ArgSlot>,
    iter_count: u32,
}

impl<'a> Converter<'a> {
    // ------------------------------------------------------------------
    // Variables
    // ------------------------------------------------------------------

    /// The placeholder for a user variable, creating its extract (and
    /// marshalling slot) on first sight.
    fn get_variable(&mut self, name: &str) -> Result<ValueId, Bailout> {
        if let Some(&var) = self.vmap.get(name) {
            return Ok(var);
        }
        let ty = match self.scope.get(name) {
            Some(v) => self
                .ti
                .type_of(v)
                .ok_or_else(|| Bailout::UnknownValueType(name.to_owned()))?,
            // Unbound variables specialize as boxed; a zero-trip loop must
            // leave them untouched.
            None => self.ti.any,
        };
        let var = self.graph.var(name);
        let extract = self.graph.extract_arg(self.args.len() as u16, ty, var);
        self.graph.append(self.entry, extract);
        self.vmap.insert(name.to_owned(), var);
        self.vars.push(var);
        self.args.push(ArgSlot { name: name.to_owned(), var, extract, ty });
        Ok(var)
    }

    /// A compiler-internal variable; not marshalled in or out.
    fn make_iterator(&mut self) -> ValueId {
        let name = format!("#iter{}", self.iter_count);
        self.iter_count += 1;
        let var = self.graph.var(&name);
        self.vmap.insert(name, var);
        self.vars.push(var);
        var
    }

    // ------------------------------------------------------------------
    // Syntax walk
    // ------------------------------------------------------------------

    fn append_call(&mut self, f: FnRef, args: &[ValueId]) -> ValueId {
        let v = self.graph.call(f, args);
        self.graph.append(self.block, v);
        v
    }

    fn visit_expr(&mut self, e: &Expr) -> Result<ValueId, Bailout> {
        match e {
            Expr::Const(v) => {
                let c = match v {
                    Value::Scalar(x) => Constant::Scalar(*x),
                    Value::Bool(b) => Constant::Bool(*b),
                    Value::Range(r) => Constant::Range(*r),
                    Value::Str(s) => Constant::Str(s.clone()),
                    Value::Matrix(_) => return Err(Bailout::UnsupportedConstant("matrix")),
                    Value::Index(_) | Value::Undef => {
                        return Err(Bailout::UnsupportedConstant("non-literal"))
                    }
                };
                let v = self.graph.constant(c, self.ti);
                self.graph.append(self.block, v);
                Ok(v)
            }
            Expr::Ident(name) => {
                let var = self.get_variable(name)?;
                Ok(self.append_call(FnRef::Grab, &[var]))
            }
            Expr::Binary { op, lhs, rhs } => {
                let l = self.visit_expr(lhs)?;
                let r = self.visit_expr(rhs)?;
                Ok(self.append_call(FnRef::Binary(*op), &[l, r]))
            }
            Expr::Unary { .. } => Err(Bailout::Unsupported("unary operator")),
        }
    }

    /// Bind `name` to `src`, optionally echoing the new binding.
    fn do_assign(&mut self, name: &str, src: ValueId, print: bool) -> Result<ValueId, Bailout> {
        let var = self.get_variable(name)?;
        let assign = self.graph.assign(var, src);
        self.graph.append(self.block, assign);
        if print {
            self.emit_print(name, assign);
        }
        Ok(assign)
    }

    fn emit_print(&mut self, name: &str, value: ValueId) {
        let label = self.graph.constant(Constant::Str(name.into()), self.ti);
        self.graph.append(self.block, label);
        self.append_call(FnRef::Print, &[label, value]);
    }

    fn visit_stmts(&mut self, stmts: &[Stmt]) -> Result<(), Bailout> {
        for s in stmts {
            self.visit_stmt(s)?;
        }
        Ok(())
    }

    fn visit_stmt(&mut self, stmt: &Stmt) -> Result<(), Bailout> {
        match &stmt.kind {
            StmtKind::Assign { name, rhs } => {
                let v = self.visit_expr(rhs)?;
                self.do_assign(name, v, stmt.print)?;
                Ok(())
            }
            StmtKind::Expr(e) => {
                let v = self.visit_expr(e)?;
                match e {
                    // Reading a variable does not rebind `ans`.
                    Expr::Ident(name) => {
                        if stmt.print {
                            self.emit_print(name, v);
                        }
                    }
                    _ => {
                        self.do_assign("ans", v, stmt.print)?;
                    }
                }
                Ok(())
            }
            StmtKind::For(f) => self.visit_for(f),
            StmtKind::If(s) => self.visit_if(s),
            StmtKind::While { .. } => Err(Bailout::Unsupported("while loop")),
            StmtKind::Break => Err(Bailout::Unsupported("break")),
            StmtKind::Continue => Err(Bailout::Unsupported("continue")),
        }
    }

    fn visit_for(&mut self, f: &ForStmt) -> Result<(), Bailout> {
        let control = self.visit_expr(&f.control)?;
        let iter = self.make_iterator();
        let init = self.append_call(FnRef::ForInit, &[control]);
        let assign = self.graph.assign(iter, init);
        self.graph.append(self.block, assign);

        let body = self.graph.add_block("for_body");
        let incr = self.graph.add_block("for_incr");
        let tail = self.graph.add_block("for_tail");

        // A constant non-empty bound cannot take the zero-trip path, so
        // the body is entered unconditionally and variables first defined
        // inside the loop keep their body types at the tail.
        let known_nonempty =
            matches!(&f.control, Expr::Const(Value::Range(r)) if !r.is_empty());
        if known_nonempty {
            let j = self.graph.jump(body);
            self.graph.append(self.block, j);
        } else {
            let check = self.append_call(FnRef::ForCheck, &[control, iter]);
            let br = self.graph.branch(check, body, tail);
            self.graph.append(self.block, br);
        }

        self.block = body;
        let elem = self.append_call(FnRef::ForIndex, &[control, iter]);
        self.do_assign(&f.var, elem, false)?;
        self.visit_stmts(&f.body)?;
        let j = self.graph.jump(incr);
        self.graph.append(self.block, j);

        self.block = incr;
        let one = self.graph.constant(Constant::Index(1), self.ti);
        self.graph.append(incr, one);
        let next = self.append_call(FnRef::Binary(BinOp::Add), &[iter, one]);
        let assign = self.graph.assign(iter, next);
        self.graph.append(incr, assign);
        let check = self.append_call(FnRef::ForCheck, &[control, iter]);
        let br = self.graph.branch(check, body, tail);
        self.graph.append(incr, br);

        self.block = tail;
        Ok(())
    }

    fn visit_if(&mut self, s: &IfStmt) -> Result<(), Bailout> {
        if s.clauses.is_empty() {
            return Ok(());
        }
        let tail = self.graph.add_block("if_tail");
        let n = s.clauses.len();
        for (i, clause) in s.clauses.iter().enumerate() {
            match &clause.cond {
                Some(c) => {
                    let cond = self.visit_expr(c)?;
                    let test = self.append_call(FnRef::LogicallyTrue, &[cond]);
                    let body = self.graph.add_block("if_body");
                    let next = if i + 1 < n { self.graph.add_block("if_else") } else { tail };
                    let br = self.graph.branch(test, body, next);
                    self.graph.append(self.block, br);

                    self.block = body;
                    self.visit_stmts(&clause.body)?;
                    let j = self.graph.jump(tail);
                    self.graph.append(self.block, j);
                    self.block = next;
                }
                None => {
                    if i + 1 != n {
                        return Err(Bailout::Unsupported("else before end of if chain"));
                    }
                    self.visit_stmts(&clause.body)?;
                    let j = self.graph.jump(tail);
                    self.graph.append(self.block, j);
                }
            }
        }
        self.block = tail;
        Ok(())
    }

    // ------------------------------------------------------------------
    // SSA construction
    // ------------------------------------------------------------------

    fn construct_ssa(&mut self) -> Result<(), Bailout> {
        let dom = DomTree::build(&self.graph, self.entry);
        self.place_phis(&dom);

        let mut stacks: SecondaryMap<ValueData, Vec<ValueId>> =
            SecondaryMap::with_capacity(self.graph.num_values());
        self.rename(&dom, self.entry, &mut stacks)?;

        // A phi placed for a variable with no definition on one inbound
        // path keeps a placeholder operand there. Iterator variables of
        // nested loops hit this at the outer loop header. Every real use
        // of such a variable is dominated by a later definition, so the
        // phi is dead; drop these (and phis that only fed them) before
        // the defect scan below.
        let mut swept = true;
        while swept {
            swept = false;
            for b in self.graph.block_ids().collect::<Vec<_>>() {
                for v in self.graph.block(b).insts.clone() {
                    let data = self.graph.value(v);
                    let dangling = data.is_phi()
                        && data
                            .args
                            .iter()
                            .any(|&a| matches!(self.graph.value(a).kind, ValueKind::Var(_)));
                    if dangling && self.graph.use_count(v) == 0 {
                        self.graph.detach(v);
                        swept = true;
                    }
                }
            }
        }

        // Every placeholder operand must be gone now; one left behind
        // means a path read a variable with no reaching definition.
        for b in self.graph.block_ids().collect::<Vec<_>>() {
            for &v in &self.graph.block(b).insts.clone() {
                for &arg in self.graph.value(v).args.iter() {
                    if matches!(self.graph.value(arg).kind, ValueKind::Var(_)) {
                        return Err(Bailout::Internal(format!(
                            "operand of {v:?} not renamed"
                        )));
                    }
                }
            }
        }
        if let Err(msg) = self.graph.verify() {
            return Err(Bailout::Internal(msg));
        }
        log::trace!("converted graph:\n{}", self.graph.dump(self.ti));
        Ok(())
    }

    /// Iterated dominance-frontier phi placement, per variable.
    fn place_phis(&mut self, dom: &DomTree) {
        // Blocks that define or use each variable.
        let mut var_blocks: SecondaryMap<ValueData, Vec<BlockId>> =
            SecondaryMap::with_capacity(self.graph.num_values());
        for &b in &dom.rpo {
            for &v in &self.graph.block(b).insts {
                if let Some(tag) = self.graph.value(v).tag {
                    var_blocks[tag].push(b);
                }
                for &arg in self.graph.value(v).args.iter() {
                    if matches!(self.graph.value(arg).kind, ValueKind::Var(_)) {
                        var_blocks[arg].push(b);
                    }
                }
            }
        }

        for vi in 0..self.vars.len() {
            let var = self.vars[vi];
            let mut worklist = std::mem::take(&mut var_blocks[var]);
            let mut placed = crate::ir::arena::BitSet::with_capacity(self.graph.num_blocks());
            while let Some(b) = worklist.pop() {
                for &df in dom.frontier(b) {
                    if placed.insert(df.as_usize()) {
                        let npreds = self.graph.preds(df).len();
                        let phi = self.graph.phi(var, npreds);
                        self.graph.prepend(df, phi);
                        worklist.push(df);
                    }
                }
            }
        }
    }

    /// Dominator-tree renaming walk. Stacks hold the live definition chain
    /// per variable; phis of successor blocks are filled with this block's
    /// tops before descending.
    fn rename(
        &mut self,
        dom: &DomTree,
        block: BlockId,
        stacks: &mut SecondaryMap<ValueData, Vec<ValueId>>,
    ) -> Result<(), Bailout> {
        let mut pushed: Vec<ValueId> = Vec::new();

        for v in self.graph.block(block).insts.clone() {
            let is_phi = self.graph.value(v).is_phi();
            if !is_phi {
                for slot in 0..self.graph.value(v).args.len() {
                    let arg = self.graph.value(v).args[slot];
                    if matches!(self.graph.value(arg).kind, ValueKind::Var(_)) {
                        let top = stacks[arg].last().copied().ok_or_else(|| {
                            Bailout::Internal("variable read before definition".into())
                        })?;
                        self.graph.connect(v, slot, top);
                    }
                }
            }
            if let Some(tag) = self.graph.value(v).tag {
                // Rebinding releases the shadowed value, exactly as the
                // interpreter drops the old binding on assignment. Internal
                // iterators are unboxed (their release is a no-op) and a
                // release would pin the dead header phis swept below.
                let internal = matches!(
                    &self.graph.value(tag).kind,
                    ValueKind::Var(name) if name.starts_with('#')
                );
                if !internal && matches!(self.graph.value(v).kind, ValueKind::Assign) {
                    if let Some(&prev) = stacks[tag].last() {
                        let release = self.graph.call(FnRef::Release, &[prev]);
                        self.graph.insert_after(v, release);
                    }
                }
                stacks[tag].push(v);
                pushed.push(tag);
            }
        }

        for succ in self.graph.succs(block) {
            let Some(pidx) = self.graph.pred_index(succ, block) else { continue };
            for v in self.graph.block(succ).insts.clone() {
                if !self.graph.value(v).is_phi() {
                    continue;
                }
                let Some(tag) = self.graph.value(v).tag else { continue };
                if let Some(&top) = stacks[tag].last() {
                    self.graph.connect(v, pidx, top);
                }
            }
        }

        for &child in dom.children(block) {
            self.rename(dom, child, stacks)?;
        }

        for var in pushed {
            stacks[var].pop();
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
