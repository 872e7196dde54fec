//! The Mira evaluator: a tree-walking interpreter with an attached
//! loop specializer.
//!
//! [`Interpreter`] executes statement trees from `mira_parser` against a
//! `mira_runtime` scope. Counted `for` loops are offered to the
//! `mira_jit` specializer first; everything else, and every loop the
//! specializer declines, is interpreted.

pub mod interpreter;

pub use interpreter::Interpreter;
