//! Just-in-time loop specializer for the Mira evaluator.
//!
//! The evaluator hands each counted `for` loop to [`TreeJit::try_execute`].
//! The first time a site is seen, the loop body is converted to SSA form,
//! operand types are inferred from the live scope, and the typed graph is
//! lowered to a small native program over unboxed slots. Subsequent
//! executions re-derive the captured variables' types and run the compiled
//! program when they still match; any unsupported construct or untypable
//! operation permanently bails the site back to interpretation.
//!
//! Pipeline: [`convert`] -> [`infer`] -> [`codegen`], cached by [`cache`].

pub mod backend;
pub mod cache;
pub mod codegen;
pub mod convert;
pub mod error;
pub mod infer;
pub mod ir;
pub mod typeinfo;

pub use cache::{DispatchStats, TreeJit};
pub use error::Bailout;
pub use typeinfo::TypeInfo;
