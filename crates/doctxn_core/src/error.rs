//! Error types for the transaction protocol.

use crate::types::TxnId;
use doctxn_store::StoreError;
use thiserror::Error;

/// Result type for transaction operations.
pub type TxnResult<T> = Result<T, TxnError>;

/// Errors that can occur while running or resuming transactions.
///
/// [`TxnError::Aborted`] is a definitive outcome. [`TxnError::Chaos`] means
/// the outcome is unknown and the transaction must be resumed. Callers should
/// never treat one as the other; see [`TxnError::is_aborted`] and
/// [`TxnError::is_chaos`].
#[derive(Debug, Error)]
pub enum TxnError {
    /// An assertion failed; the transaction is terminally aborted.
    #[error("transaction {id} aborted")]
    Aborted {
        /// The aborted transaction.
        id: TxnId,
    },

    /// The worker was killed by fault injection before the transaction
    /// reached a terminal state.
    #[error("transaction interrupted by fault injection, resume required")]
    Chaos,

    /// No record exists for the transaction.
    #[error("transaction not found: {id}")]
    NotFound {
        /// The missing transaction.
        id: TxnId,
    },

    /// The id is already used by a transaction with different operations.
    #[error("transaction {id} already exists with different operations")]
    DuplicateTransaction {
        /// The conflicting transaction id.
        id: TxnId,
    },

    /// The operation list is malformed.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of the problem.
        message: String,
    },

    /// A transaction record or a queue is malformed.
    #[error("transaction data corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// CBOR encoding or decoding of a record payload failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The document store failed.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl TxnError {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Returns true for a definitive abort.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Returns true if the outcome is unknown because of fault injection.
    #[must_use]
    pub fn is_chaos(&self) -> bool {
        matches!(self, Self::Chaos)
    }
}

impl From<StoreError> for TxnError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Killed => Self::Chaos,
            other => Self::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn killed_store_error_becomes_chaos() {
        let err: TxnError = StoreError::Killed.into();
        assert!(err.is_chaos());
        assert!(!err.is_aborted());
    }

    #[test]
    fn unavailable_store_error_is_propagated() {
        let err: TxnError = StoreError::unavailable("down").into();
        assert!(matches!(err, TxnError::Store(StoreError::Unavailable { .. })));
        assert_eq!(err.to_string(), "store error: store unavailable: down");
    }

    #[test]
    fn aborted_is_not_chaos() {
        let err = TxnError::Aborted {
            id: TxnId::from("t1"),
        };
        assert!(err.is_aborted());
        assert!(!err.is_chaos());
        assert_eq!(err.to_string(), "transaction t1 aborted");
    }
}
