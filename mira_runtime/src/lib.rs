//! Dynamic value model of the Mira host language.
//!
//! Everything the evaluator and the loop specializer share lives here:
//!
//! - [`Value`]: the boxed runtime value (scalars, ranges, matrices, ...).
//! - [`Scope`]: the name-to-value binding environment.
//! - [`ops`]: dynamic binary-operator dispatch and truthiness, used by the
//!   interpreter directly and by compiled code's boxed fallback kernels, so
//!   both execution paths share one set of semantics.

pub mod ops;
pub mod scope;
pub mod value;

pub use ops::{binary_op, display_binding, is_true, BinOp, RuntimeFault};
pub use scope::Scope;
pub use value::{Range, Value};
