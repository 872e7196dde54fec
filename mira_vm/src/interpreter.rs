//! The tree-walking evaluator.
//!
//! Walks [`Stmt`] trees against a [`Scope`]. When a specializer is
//! attached, every counted `for` loop is offered to it first and only
//! interpreted when dispatch answers `false`; the two paths share the
//! dynamic operators and the range element rule, so a loop computes the
//! same bits either way.

use mira_jit::TreeJit;
use mira_parser::{Expr, ForStmt, IfStmt, Stmt, StmtKind, UnOp};
use mira_runtime::{binary_op, display_binding, is_true, RuntimeFault, Scope, Value};

/// Control-flow signal bubbling out of a statement list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Break,
    Continue,
}

pub struct Interpreter {
    jit: Option<TreeJit>,
}

impl Interpreter {
    /// An evaluator with the loop specializer attached.
    pub fn new() -> Interpreter {
        Interpreter { jit: Some(TreeJit::new()) }
    }

    /// Pure tree walking, no compilation.
    pub fn interpret_only() -> Interpreter {
        Interpreter { jit: None }
    }

    pub fn jit(&self) -> Option<&TreeJit> {
        self.jit.as_ref()
    }

    pub fn run(&mut self, scope: &mut Scope, program: &[Stmt]) -> Result<(), RuntimeFault> {
        match self.exec_stmts(scope, program)? {
            Flow::Normal => Ok(()),
            // break/continue outside a loop
            _ => Err(RuntimeFault::Internal("loop control outside a loop")),
        }
    }

    fn exec_stmts(&mut self, scope: &mut Scope, stmts: &[Stmt]) -> Result<Flow, RuntimeFault> {
        for s in stmts {
            match self.exec_stmt(scope, s)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, scope: &mut Scope, stmt: &Stmt) -> Result<Flow, RuntimeFault> {
        match &stmt.kind {
            StmtKind::Assign { name, rhs } => {
                let v = self.eval(scope, rhs)?;
                if stmt.print {
                    display_binding(name, &v);
                }
                scope.set(name, v);
                Ok(Flow::Normal)
            }
            StmtKind::Expr(e) => {
                let v = self.eval(scope, e)?;
                match e {
                    // Reading a variable echoes it but does not rebind `ans`.
                    Expr::Ident(name) => {
                        if stmt.print {
                            display_binding(name, &v);
                        }
                    }
                    _ => {
                        if stmt.print {
                            display_binding("ans", &v);
                        }
                        scope.set("ans", v);
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::For(f) => {
                self.exec_for(scope, f)?;
                Ok(Flow::Normal)
            }
            StmtKind::If(s) => self.exec_if(scope, s),
            StmtKind::While { cond, body } => {
                while is_true(&self.eval(scope, cond)?)? {
                    match self.exec_stmts(scope, body)? {
                        Flow::Break => break,
                        _ => continue,
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
        }
    }

    fn exec_if(&mut self, scope: &mut Scope, s: &IfStmt) -> Result<Flow, RuntimeFault> {
        for clause in &s.clauses {
            let taken = match &clause.cond {
                Some(c) => is_true(&self.eval(scope, c)?)?,
                None => true,
            };
            if taken {
                return self.exec_stmts(scope, &clause.body);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_for(&mut self, scope: &mut Scope, f: &ForStmt) -> Result<(), RuntimeFault> {
        if let Some(jit) = self.jit.as_mut() {
            if jit.try_execute(scope, f)? {
                return Ok(());
            }
            log::trace!("interpreting loop at site {}", f.site);
        }

        let control = self.eval(scope, &f.control)?;
        match control {
            Value::Range(r) => {
                for idx in 0..r.nelem() {
                    scope.set(&f.var, Value::Scalar(r.elem(idx)));
                    if self.run_body(scope, &f.body)? == Flow::Break {
                        break;
                    }
                }
            }
            Value::Matrix(m) => {
                for &x in m.iter() {
                    scope.set(&f.var, Value::Scalar(x));
                    if self.run_body(scope, &f.body)? == Flow::Break {
                        break;
                    }
                }
            }
            // A non-collection bound iterates once over itself.
            Value::Scalar(_) | Value::Bool(_) | Value::Index(_) | Value::Str(_) => {
                scope.set(&f.var, control);
                self.run_body(scope, &f.body)?;
            }
            Value::Undef => return Err(RuntimeFault::UndefinedOperand),
        }
        Ok(())
    }

    fn run_body(&mut self, scope: &mut Scope, body: &[Stmt]) -> Result<Flow, RuntimeFault> {
        match self.exec_stmts(scope, body)? {
            Flow::Continue => Ok(Flow::Normal),
            flow => Ok(flow),
        }
    }

    fn eval(&mut self, scope: &mut Scope, e: &Expr) -> Result<Value, RuntimeFault> {
        match e {
            Expr::Const(v) => Ok(v.clone()),
            Expr::Ident(name) => scope
                .get(name)
                .cloned()
                .ok_or_else(|| RuntimeFault::Undefined(name.clone())),
            Expr::Binary { op, lhs, rhs } => {
                let l = self.eval(scope, lhs)?;
                let r = self.eval(scope, rhs)?;
                binary_op(*op, &l, &r)
            }
            Expr::Unary { op, operand } => {
                let v = self.eval(scope, operand)?;
                match op {
                    UnOp::Neg => match &v {
                        Value::Matrix(m) => {
                            Ok(Value::Matrix(m.iter().map(|&x| -x).collect::<Vec<_>>().into()))
                        }
                        _ => v
                            .as_f64()
                            .map(|x| Value::Scalar(-x))
                            .ok_or(RuntimeFault::UndefinedBinary {
                                op: "-",
                                lhs: v.type_name(),
                                rhs: "",
                            }),
                    },
                    UnOp::Not => Ok(Value::Bool(!is_true(&v)?)),
                }
            }
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use mira_parser::AstBuilder;
    use mira_runtime::BinOp;

    fn run(program: &[Stmt]) -> Scope {
        let mut scope = Scope::new();
        Interpreter::interpret_only().run(&mut scope, program).expect("run");
        scope
    }

    #[test]
    fn assignment_and_expression_statements() {
        let b = AstBuilder::new();
        let scope = run(&[
            b.assign("a", b.num(2.0)),
            b.expr_stmt(b.binary(BinOp::Mul, b.ident("a"), b.num(3.0))),
        ]);
        assert_eq!(scope.get("a"), Some(&Value::Scalar(2.0)));
        assert_eq!(scope.get("ans"), Some(&Value::Scalar(6.0)));
    }

    #[test]
    fn reading_an_ident_does_not_rebind_ans() {
        let b = AstBuilder::new();
        let scope = run(&[b.assign("a", b.num(2.0)), b.expr_stmt(b.ident("a"))]);
        assert!(scope.get("ans").is_none());
    }

    #[test]
    fn undefined_read_faults() {
        let b = AstBuilder::new();
        let mut scope = Scope::new();
        let err = Interpreter::interpret_only()
            .run(&mut scope, &[b.expr_stmt(b.ident("nope"))])
            .unwrap_err();
        assert_eq!(err, RuntimeFault::Undefined("nope".into()));
    }

    #[test]
    fn for_loop_over_range_and_matrix() {
        let mut b = AstBuilder::new();
        let scope = run(&[
            b.assign("s", b.num(0.0)),
            b.for_stmt(
                "i",
                b.range(1.0, 4.0),
                vec![b.assign("s", b.binary(BinOp::Add, b.ident("s"), b.ident("i")))],
            ),
        ]);
        assert_eq!(scope.get("s"), Some(&Value::Scalar(10.0)));
        // trailing binding survives the loop
        assert_eq!(scope.get("i"), Some(&Value::Scalar(4.0)));

        let scope = run(&[
            b.assign("m", b.num(0.0)),
            b.assign("s", b.num(0.0)),
            b.for_stmt(
                "x",
                Expr::Const(Value::matrix(vec![5.0, 7.0])),
                vec![b.assign("s", b.binary(BinOp::Add, b.ident("s"), b.ident("x")))],
            ),
        ]);
        assert_eq!(scope.get("s"), Some(&Value::Scalar(12.0)));
    }

    #[test]
    fn zero_trip_loop_skips_body_and_binding() {
        let mut b = AstBuilder::new();
        let scope = run(&[b.for_stmt(
            "i",
            b.range(1.0, 0.0),
            vec![b.assign("touched", b.num(1.0))],
        )]);
        assert!(scope.get("i").is_none());
        assert!(scope.get("touched").is_none());
    }

    #[test]
    fn while_break_continue() {
        let b = AstBuilder::new();
        // n = 0; k = 0; while 1 { n = n + 1; if n > 5 { break }
        //                         if n > 3 { continue } k = k + 1 }
        let body = vec![
            b.assign("n", b.binary(BinOp::Add, b.ident("n"), b.num(1.0))),
            b.if_stmt(vec![
                b.clause(b.binary(BinOp::Gt, b.ident("n"), b.num(5.0)), vec![Stmt {
                    kind: StmtKind::Break,
                    print: false,
                }]),
            ]),
            b.if_stmt(vec![
                b.clause(b.binary(BinOp::Gt, b.ident("n"), b.num(3.0)), vec![Stmt {
                    kind: StmtKind::Continue,
                    print: false,
                }]),
            ]),
            b.assign("k", b.binary(BinOp::Add, b.ident("k"), b.num(1.0))),
        ];
        let scope = run(&[
            b.assign("n", b.num(0.0)),
            b.assign("k", b.num(0.0)),
            b.while_stmt(b.num(1.0), body),
        ]);
        assert_eq!(scope.get("n"), Some(&Value::Scalar(6.0)));
        assert_eq!(scope.get("k"), Some(&Value::Scalar(3.0)));
    }

    #[test]
    fn elseif_chain_picks_first_true_clause() {
        let b = AstBuilder::new();
        let pick = |x: f64| {
            let program = [
                b.assign("x", b.num(x)),
                b.if_stmt(vec![
                    b.clause(
                        b.binary(BinOp::Lt, b.ident("x"), b.num(0.0)),
                        vec![b.assign("r", b.num(-1.0))],
                    ),
                    b.clause(
                        b.binary(BinOp::Eq, b.ident("x"), b.num(0.0)),
                        vec![b.assign("r", b.num(0.0))],
                    ),
                    b.else_clause(vec![b.assign("r", b.num(1.0))]),
                ]),
            ];
            run(&program).get("r").cloned()
        };
        assert_eq!(pick(-3.0), Some(Value::Scalar(-1.0)));
        assert_eq!(pick(0.0), Some(Value::Scalar(0.0)));
        assert_eq!(pick(9.0), Some(Value::Scalar(1.0)));
    }

    #[test]
    fn unary_operators() {
        let b = AstBuilder::new();
        let scope = run(&[
            b.assign("a", b.neg(b.num(3.0))),
            b.assign("t", Expr::Unary {
                op: UnOp::Not,
                operand: Box::new(b.num(0.0)),
            }),
        ]);
        assert_eq!(scope.get("a"), Some(&Value::Scalar(-3.0)));
        assert_eq!(scope.get("t"), Some(&Value::Bool(true)));
    }
}
