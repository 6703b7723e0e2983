//! Error types for urlseal.
//!
//! Only programmer and configuration mistakes are errors.  A URL that
//! fails verification or has aged out is an expected outcome and is
//! reported as a value (`bool` or [`crate::expiry::LinkStatus`]), never
//! through this enum.

use thiserror::Error;

/// Result type alias for urlseal operations.
pub type Result<T> = std::result::Result<T, SealError>;

/// Argument and configuration errors.
#[derive(Debug, Error)]
pub enum SealError {
    /// A required input was missing or malformed (e.g. an empty URL).
    #[error("{message}")]
    InvalidArgument { message: String },

    /// The input is well-formed but unusable in this state: a relative
    /// URL where an absolute one is required, or an empty salt.
    #[error("{message}")]
    InvalidState { message: String },
}

impl SealError {
    /// Build an [`SealError::InvalidArgument`].
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        SealError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Build an [`SealError::InvalidState`].
    pub fn invalid_state(message: impl Into<String>) -> Self {
        SealError::InvalidState {
            message: message.into(),
        }
    }

    /// Return a stable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            SealError::InvalidArgument { .. } => "InvalidArgument",
            SealError::InvalidState { .. } => "InvalidState",
        }
    }
}
