//! Error types for document store operations.

use thiserror::Error;

/// Result type for document store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during document store operations.
///
/// A conditional write whose condition does not hold is **not** an error;
/// it is reported as `Ok(false)` by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or refused the request.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// A mutation could not be applied to the current document.
    #[error("invalid mutation: {message}")]
    InvalidMutation {
        /// Description of the problem.
        message: String,
    },

    /// A stored document is malformed.
    #[error("document corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// The calling worker was killed by fault injection.
    ///
    /// Only produced by chaos-testing wrappers; the write that preceded the
    /// kill may or may not have been applied.
    #[error("worker killed by fault injection")]
    Killed,
}

impl StoreError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates an invalid mutation error.
    pub fn invalid_mutation(message: impl Into<String>) -> Self {
        Self::InvalidMutation {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}
