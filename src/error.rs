//! Error taxonomy for sparsity computation and assembly.
//!
//! Fallible operations in this crate return [`eyre::Result`]. Errors that originate in the
//! assembly machinery itself are reported as an [`AssemblyError`] wrapped in the report, so
//! that callers can recover the category with `report.downcast_ref::<AssemblyError>()`.
use thiserror::Error;

/// Errors raised while building or assembling a stiffness matrix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum AssemblyError {
    /// The row and column function spaces cannot be combined into one matrix.
    #[error("incompatible row and column function spaces: {reason}")]
    IncompatibleSpaces { reason: String },

    /// An owned row receives no contribution from any element.
    #[error("row {row} has no incident elements and zero element contributions are not allowed")]
    EmptyRow { row: usize },

    /// No terms are registered and zero element contributions are not allowed.
    #[error("no stiffness terms registered and zero element contributions are not allowed")]
    NoTerms,

    /// A nonlinear matrix was assembled without the current solution.
    #[error("nonlinear stiffness matrix requires the current solution state for assembly")]
    MissingSolutionState,

    /// Assembly was requested before the sparsity was computed and the matrix allocated.
    #[error("stiffness matrix has not been built")]
    NotBuilt,

    /// An entry was inserted outside of the preallocated nonzero pattern.
    #[error("entry ({row}, {col}) is not part of the preallocated nonzero pattern")]
    PatternMiss { row: usize, col: usize },

    /// A term produced a non-finite value.
    #[error("term '{term}' produced a non-finite contribution for element {element} at local entry ({row}, {col})")]
    MalformedContribution {
        element: usize,
        term: String,
        row: usize,
        col: usize,
    },

    /// A term failed to evaluate.
    #[error("term '{term}' failed on element {element}")]
    TermFailure { element: usize, term: String },

    /// A boundary correction mode needs a vector that was not supplied.
    #[error("boundary correction '{mode}' requires a {vector} vector")]
    MissingVector {
        mode: &'static str,
        vector: &'static str,
    },

    /// The diagonal entry of a constrained row is not stored in the matrix.
    #[error("diagonal entry of row {row} is not part of the nonzero pattern")]
    DiagonalNotInPattern { row: usize },

    /// Ownership offsets are not a valid partition.
    #[error("invalid partition: {reason}")]
    InvalidPartition { reason: String },

    /// Another member of the process group failed during a collective operation.
    #[error("a collective operation failed on another member of the process group")]
    RemoteFailure,

    /// Storage for nonzero structure or matrix values could not be allocated.
    #[error("failed to allocate {what}")]
    Allocation { what: String },
}
