//! Core type definitions for the transaction protocol.

use doctxn_store::{DocId, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique, caller-supplied identifier of a transaction.
///
/// The id doubles as the token placed on each document's pending queue
/// and as the revision stamp written by the transaction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(String);

impl TxnId {
    /// Creates a transaction id from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the id is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The queue token for this transaction.
    pub(crate) fn token(&self) -> Value {
        Value::Text(self.0.clone())
    }

    /// The key of this transaction's record document.
    pub(crate) fn doc_id(&self) -> DocId {
        DocId::Text(self.0.clone())
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TxnId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TxnId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Lifecycle state of a transaction record.
///
/// ```text
/// Preparing -> Prepared -> Applying -> Applied
///                      \-> Aborting -> Aborted
/// ```
///
/// States only move forward; codes are stored in the record and increase
/// along every path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TxnState {
    /// Record persisted; the id is being queued on every touched document.
    Preparing,
    /// Queued at the head of every touched document; decision pending.
    Prepared,
    /// Abort decided; queue cleanup in progress.
    Aborting,
    /// Commit decided; document writes in progress.
    Applying,
    /// Terminal: no effect on any document.
    Aborted,
    /// Terminal: every effect is visible.
    Applied,
}

impl TxnState {
    /// Returns the stored code of this state.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            TxnState::Preparing => 1,
            TxnState::Prepared => 2,
            TxnState::Aborting => 3,
            TxnState::Applying => 4,
            TxnState::Aborted => 5,
            TxnState::Applied => 6,
        }
    }

    /// Parses a stored state code.
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(TxnState::Preparing),
            2 => Some(TxnState::Prepared),
            3 => Some(TxnState::Aborting),
            4 => Some(TxnState::Applying),
            5 => Some(TxnState::Aborted),
            6 => Some(TxnState::Applied),
            _ => None,
        }
    }

    /// Returns true for `Applied` and `Aborted`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, TxnState::Applied | TxnState::Aborted)
    }

    /// Highest code of a non-terminal state.
    pub(crate) const LAST_PENDING_CODE: i64 = 4;
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxnState::Preparing => "preparing",
            TxnState::Prepared => "prepared",
            TxnState::Aborting => "aborting",
            TxnState::Applying => "applying",
            TxnState::Aborted => "aborted",
            TxnState::Applied => "applied",
        };
        f.write_str(name)
    }
}
