//! Operations: one assertion plus at most one action against one document.

use crate::error::{TxnError, TxnResult};
use crate::queue::is_reserved;
use doctxn_store::{DocId, Fields, Filter, Mutation, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Precondition on a document, checked immediately before the action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Assertion {
    /// No precondition.
    #[default]
    None,
    /// The document must not exist.
    DocMissing,
    /// The document must exist.
    DocExists,
    /// The document must exist and match the filter.
    Matches(Filter),
}

impl Assertion {
    /// Evaluates the assertion against a document's user fields
    /// (`None` when the document does not exist).
    #[must_use]
    pub fn holds(&self, doc: Option<&Fields>) -> bool {
        match self {
            Assertion::None => true,
            Assertion::DocMissing => doc.is_none(),
            Assertion::DocExists => doc.is_some(),
            Assertion::Matches(filter) => doc.is_some_and(|fields| filter.matches_fields(fields)),
        }
    }
}

/// The mutating part of an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Assertion-only operation.
    #[default]
    None,
    /// Create the document. Ignored if it already exists.
    Insert(Fields),
    /// Mutate the document. Ignored if it does not exist.
    Change(Mutation),
    /// Delete the document. Ignored if it does not exist.
    Remove,
}

/// A single targeted step of a transaction.
///
/// # Example
///
/// ```rust
/// use doctxn_core::Operation;
/// use doctxn_store::{Filter, Mutation};
///
/// let debit = Operation::new("accounts", 0)
///     .assert_matches(Filter::new().gte("balance", 100))
///     .change(Mutation::new().inc("balance", -100));
/// let credit = Operation::new("accounts", 1)
///     .assert_exists()
///     .change(Mutation::new().inc("balance", 100));
/// assert!(debit.validate().is_ok() && credit.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Collection holding the document.
    pub collection: String,
    /// Target document.
    pub id: DocId,
    /// Precondition.
    pub assert: Assertion,
    /// Effect.
    pub action: Action,
}

impl Operation {
    /// Creates an assertion-free, action-free operation on a document.
    pub fn new(collection: impl Into<String>, id: impl Into<DocId>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            assert: Assertion::None,
            action: Action::None,
        }
    }

    /// Requires the document to be missing.
    #[must_use]
    pub fn assert_missing(mut self) -> Self {
        self.assert = Assertion::DocMissing;
        self
    }

    /// Requires the document to exist.
    #[must_use]
    pub fn assert_exists(mut self) -> Self {
        self.assert = Assertion::DocExists;
        self
    }

    /// Requires the document to exist and match `filter`.
    #[must_use]
    pub fn assert_matches(mut self, filter: Filter) -> Self {
        self.assert = Assertion::Matches(filter);
        self
    }

    /// Inserts the document with the given fields.
    #[must_use]
    pub fn insert(mut self, fields: Fields) -> Self {
        self.action = Action::Insert(fields);
        self
    }

    /// Inserts the document built from `(field, value)` pairs.
    #[must_use]
    pub fn insert_fields<K, V, I>(self, pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let fields = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.insert(fields)
    }

    /// Applies a mutation to the document.
    #[must_use]
    pub fn change(mut self, mutation: Mutation) -> Self {
        self.action = Action::Change(mutation);
        self
    }

    /// Removes the document.
    #[must_use]
    pub fn remove(mut self) -> Self {
        self.action = Action::Remove;
        self
    }

    /// Returns the `(collection, id)` key of the target document.
    pub(crate) fn key(&self) -> (String, DocId) {
        (self.collection.clone(), self.id.clone())
    }

    /// Checks this operation on its own.
    ///
    /// # Errors
    ///
    /// Returns [`TxnError::InvalidOperation`] for an empty collection, an
    /// empty text id, or any reference to a `txn-` field.
    pub fn validate(&self) -> TxnResult<()> {
        if self.collection.is_empty() {
            return Err(TxnError::invalid_operation("empty collection name"));
        }
        if !self.id.is_valid() {
            return Err(TxnError::invalid_operation(format!(
                "empty document id in collection {:?}",
                self.collection
            )));
        }
        if let Assertion::Matches(filter) = &self.assert {
            if let Some(c) = filter.conditions().iter().find(|c| is_reserved(&c.field)) {
                return Err(self.reserved(&c.field));
            }
        }
        match &self.action {
            Action::Insert(fields) => {
                if let Some(name) = fields.keys().find(|name| is_reserved(name)) {
                    return Err(self.reserved(name));
                }
            }
            Action::Change(mutation) => {
                if let Some(u) = mutation.updates().iter().find(|u| is_reserved(u.field())) {
                    return Err(self.reserved(u.field()));
                }
            }
            Action::None | Action::Remove => {}
        }
        Ok(())
    }

    fn reserved(&self, field: &str) -> TxnError {
        TxnError::invalid_operation(format!(
            "field {field:?} on {}/{} is reserved for transaction bookkeeping",
            self.collection, self.id
        ))
    }
}

/// Checks a whole operation list.
///
/// # Errors
///
/// Returns [`TxnError::InvalidOperation`] if the list is empty, if any
/// operation is invalid, or if one document is inserted twice or removed
/// twice within the list.
pub fn validate_ops(ops: &[Operation]) -> TxnResult<()> {
    if ops.is_empty() {
        return Err(TxnError::invalid_operation("empty operation list"));
    }
    let mut seen: HashMap<(&str, &DocId), (bool, bool)> = HashMap::new();
    for op in ops {
        op.validate()?;
        let (inserted, removed) = seen.entry((op.collection.as_str(), &op.id)).or_default();
        let duplicate = match op.action {
            Action::Insert(_) => std::mem::replace(inserted, true),
            Action::Remove => std::mem::replace(removed, true),
            Action::None | Action::Change(_) => false,
        };
        if duplicate {
            return Err(TxnError::invalid_operation(format!(
                "conflicting duplicate action on {}/{}",
                op.collection, op.id
            )));
        }
    }
    Ok(())
}
