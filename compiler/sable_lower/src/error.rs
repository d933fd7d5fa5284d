//! Fatal lowering errors.
//!
//! Everything here aborts the compilation unit: these are upstream contract
//! breaches or incomplete target descriptions, not user mistakes. User-level
//! problems go through `sable_diagnostic` and lowering continues.

use thiserror::Error;

/// Fatal error aborting the unit's lowering.
#[derive(Debug, Error)]
pub enum LowerError {
    /// Malformed input-node shape or a broken destination/return convention.
    /// Signals an upstream validation failure.
    #[error("lowering contract violated: {0}")]
    ContractViolation(String),

    /// Corrupted scope nesting (unbalanced push/pop, unresolved fixups).
    #[error("scope nesting corrupted: {0}")]
    CorruptScopes(String),

    /// A branch that would jump into (rather than out of) an active scope.
    #[error("branch into an active scope: label `{label}`")]
    BranchIntoScope { label: String },

    /// The active calling-convention cannot classify this shape. The
    /// target's classification table is incomplete.
    #[error("calling convention `{convention}` cannot classify {what}")]
    AbiUnsupported {
        convention: &'static str,
        what: String,
    },

    /// An aggregate whose fields cannot be laid out even byte-packed; the
    /// declared layout contradicts itself.
    #[error("declared layout of `{type_name}` is unsatisfiable: {reason}")]
    ImpossibleLayout {
        type_name: String,
        reason: String,
    },
}

impl LowerError {
    /// Shorthand for a contract violation with a formatted message.
    pub fn contract(msg: impl Into<String>) -> Self {
        LowerError::ContractViolation(msg.into())
    }
}
