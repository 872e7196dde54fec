//! Compilation abort reasons.

use thiserror::Error;

/// Why the specializer refused a loop. Bailouts are ordinary values: the
/// converter, inference and codegen all return them through `Result`, and
/// the site table records them as a permanent failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Bailout {
    /// The program uses something outside the compiled subset.
    #[error("unsupported construct: {0}")]
    Unsupported(&'static str),
    /// A literal outside the compiled value model.
    #[error("unsupported constant: {0}")]
    UnsupportedConstant(&'static str),
    /// No overload for an operation at the inferred operand types.
    #[error("no overload: {fn_name} ({arg_types})")]
    MissingOverload { fn_name: String, arg_types: String },
    /// A live value was still untyped when inference settled.
    #[error("could not type a live value")]
    Untyped,
    /// Inference failed to settle within its iteration budget.
    #[error("type inference did not converge")]
    InferenceDiverged,
    /// A host value outside the type model was bound to a captured
    /// variable.
    #[error("value of '{0}' is outside the type model")]
    UnknownValueType(String),
    /// Defensive: a pass noticed an inconsistency of its own making.
    /// Recoverable like any bailout, but distinguishable in logs.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Bailout {
    pub fn is_internal(&self) -> bool {
        matches!(self, Bailout::Internal(_))
    }
}
