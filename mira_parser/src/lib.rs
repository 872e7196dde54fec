//! Abstract syntax of the Mira host-language subset the evaluator walks.

pub mod ast;

pub use ast::{AstBuilder, Expr, ForStmt, IfClause, IfStmt, SiteId, Stmt, StmtKind, UnOp};
