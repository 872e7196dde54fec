//! AST node types.
//!
//! The tree the evaluator walks. Counted `for` loops carry a [`SiteId`]
//! assigned at construction; the loop specializer keys its per-site state on
//! it, so ids must be stable across executions of the same tree.
//!
//! Parsing proper is out of scope here; trees are produced through
//! [`AstBuilder`], which is also what the test suites use.

use mira_runtime::{BinOp, Value};

/// Stable identity of a `for` loop occurrence in a program tree.
pub type SiteId = u32;

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal. Constant folding happens upstream, so range literals like
    /// `1:5` arrive here as `Const(Value::Range(..))`.
    Const(Value),
    Ident(String),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
}

impl Expr {
    pub fn is_ident(&self) -> bool {
        matches!(self, Expr::Ident(_))
    }
}

// ============================================================================
// Statements
// ============================================================================

/// A statement plus its echo flag (`print` is set when the statement was not
/// suppressed with a trailing semicolon).
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub print: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Assign { name: String, rhs: Expr },
    /// A bare expression statement; its result binds `ans` unless the
    /// expression is a plain identifier.
    Expr(Expr),
    For(Box<ForStmt>),
    If(IfStmt),
    While { cond: Expr, body: Vec<Stmt> },
    Break,
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForStmt {
    pub site: SiteId,
    pub var: String,
    pub control: Expr,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    /// `if`/`elseif` clauses in order, then optionally a final `else`
    /// clause with no condition.
    pub clauses: Vec<IfClause>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfClause {
    pub cond: Option<Expr>,
    pub body: Vec<Stmt>,
}

// ============================================================================
// Builder
// ============================================================================

/// Constructs trees with fresh loop-site ids.
#[derive(Debug, Default)]
pub struct AstBuilder {
    next_site: SiteId,
}

impl AstBuilder {
    pub fn new() -> AstBuilder {
        AstBuilder::default()
    }

    pub fn num(&self, x: f64) -> Expr {
        Expr::Const(Value::Scalar(x))
    }

    pub fn range(&self, base: f64, limit: f64) -> Expr {
        Expr::Const(Value::range(base, limit, 1.0))
    }

    pub fn range_by(&self, base: f64, inc: f64, limit: f64) -> Expr {
        Expr::Const(Value::range(base, limit, inc))
    }

    pub fn ident(&self, name: &str) -> Expr {
        Expr::Ident(name.to_owned())
    }

    pub fn binary(&self, op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    pub fn neg(&self, operand: Expr) -> Expr {
        Expr::Unary { op: UnOp::Neg, operand: Box::new(operand) }
    }

    pub fn assign(&self, name: &str, rhs: Expr) -> Stmt {
        Stmt { kind: StmtKind::Assign { name: name.to_owned(), rhs }, print: false }
    }

    /// Non-suppressed assignment (echoes the binding).
    pub fn assign_print(&self, name: &str, rhs: Expr) -> Stmt {
        Stmt { kind: StmtKind::Assign { name: name.to_owned(), rhs }, print: true }
    }

    pub fn expr_stmt(&self, expr: Expr) -> Stmt {
        Stmt { kind: StmtKind::Expr(expr), print: false }
    }

    pub fn for_stmt(&mut self, var: &str, control: Expr, body: Vec<Stmt>) -> Stmt {
        let site = self.next_site;
        self.next_site += 1;
        Stmt {
            kind: StmtKind::For(Box::new(ForStmt {
                site,
                var: var.to_owned(),
                control,
                body,
            })),
            print: false,
        }
    }

    pub fn if_stmt(&self, clauses: Vec<IfClause>) -> Stmt {
        Stmt { kind: StmtKind::If(IfStmt { clauses }), print: false }
    }

    pub fn clause(&self, cond: Expr, body: Vec<Stmt>) -> IfClause {
        IfClause { cond: Some(cond), body }
    }

    pub fn else_clause(&self, body: Vec<Stmt>) -> IfClause {
        IfClause { cond: None, body }
    }

    pub fn while_stmt(&self, cond: Expr, body: Vec<Stmt>) -> Stmt {
        Stmt { kind: StmtKind::While { cond, body }, print: false }
    }
}
