//! Error types for accel-core operations

use accel_runtime::RuntimeError;
use std::fmt;

/// Result type for accel-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the client, buffer and executable handles
///
/// Failures detected by the bridge itself are `InvalidArgument` or
/// `FailedPrecondition`. Everything the runtime reports is passed through
/// unchanged as [`Error::Runtime`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Malformed request (bad structure, wrong sizes, unsupported shape)
    #[error("{0}")]
    InvalidArgument(String),

    /// Operation not allowed in the object's current state
    #[error("{0}")]
    FailedPrecondition(String),

    /// Error reported by the runtime
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn failed_precondition(msg: impl Into<String>) -> Self {
        Self::FailedPrecondition(msg.into())
    }

    /// Status code for host-visible reporting
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Error::FailedPrecondition(_) => ErrorCode::FailedPrecondition,
            Error::Runtime(err) => match err {
                RuntimeError::InvalidArgument(_) => ErrorCode::InvalidArgument,
                RuntimeError::FailedPrecondition(_) => ErrorCode::FailedPrecondition,
                RuntimeError::NotFound(_) => ErrorCode::NotFound,
                RuntimeError::Unavailable(_) => ErrorCode::Unavailable,
                RuntimeError::Unimplemented(_) => ErrorCode::Unimplemented,
                RuntimeError::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
                RuntimeError::Compilation(_) | RuntimeError::Execution(_) | RuntimeError::Internal(_) => {
                    ErrorCode::Internal
                }
            },
        }
    }
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidArgument,
    FailedPrecondition,
    NotFound,
    Unavailable,
    Unimplemented,
    ResourceExhausted,
    Internal,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::FailedPrecondition => "failed_precondition",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::Unimplemented => "unimplemented",
            ErrorCode::ResourceExhausted => "resource_exhausted",
            ErrorCode::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_errors_display_bare_message() {
        let err = Error::failed_precondition("Attempt to deallocate already deallocated buffer.");
        assert_eq!(err.to_string(), "Attempt to deallocate already deallocated buffer.");
        assert_eq!(err.code(), ErrorCode::FailedPrecondition);
    }

    #[test]
    fn test_runtime_errors_pass_through() {
        let err: Error = RuntimeError::not_found("no device with id 4").into();
        assert_eq!(err.to_string(), "not found: no device with id 4");
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(err.code().to_string(), "not_found");

        let err: Error = RuntimeError::execution("integer division by zero").into();
        assert_eq!(err.code(), ErrorCode::Internal);
    }
}
