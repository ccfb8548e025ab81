//! Error types for runtime operations

use std::fmt;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors raised by an accelerator runtime
///
/// The variants mirror the status codes a runtime reports. Callers above the
/// runtime surface these verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// Malformed input (bad shape, wrong size, bad structure)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation on an object in the wrong state (e.g. a deleted buffer)
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// Unknown device or other missing entity
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested platform or hardware is not available
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The runtime does not implement the requested operation
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// Out of device memory or another bounded resource
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The program could not be compiled
    #[error("compilation failed: {0}")]
    Compilation(String),

    /// The program failed while executing
    #[error("execution failed: {0}")]
    Execution(String),

    /// Runtime invariant violated
    #[error("internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a failed precondition error
    pub fn failed_precondition(msg: impl Into<String>) -> Self {
        Self::FailedPrecondition(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create an execution error
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Create a shape mismatch error
    pub fn shape_mismatch(expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Self::InvalidArgument(format!("shape mismatch: expected {expected}, got {actual}"))
    }
}

impl From<bincode::Error> for RuntimeError {
    fn from(err: bincode::Error) -> Self {
        Self::Internal(format!("serialization failed: {err}"))
    }
}
