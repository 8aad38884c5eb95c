//! Per-document pending queues and revision bookkeeping.
//!
//! Every document touched by a transaction carries three reserved fields:
//!
//! - `txn-queue`: ids of transactions pending on the document, oldest first
//! - `txn-rev`: opaque revision, replaced by every transactional write
//! - `txn-missing`: `true` on a stub, a placeholder holding the queue of a
//!   document that does not logically exist
//!
//! All helpers here are single conditional writes, so each can be repeated
//! after a crash without changing the outcome.

use crate::error::{TxnError, TxnResult};
use crate::types::TxnId;
use doctxn_store::{DocId, Document, DocumentStore, Fields, Filter, Mutation, Value};
use tracing::trace;

/// Prefix of every field reserved for transaction bookkeeping.
pub const RESERVED_PREFIX: &str = "txn-";
/// Pending queue field.
pub const QUEUE_FIELD: &str = "txn-queue";
/// Revision field.
pub const REV_FIELD: &str = "txn-rev";
/// Stub marker field.
pub const MISSING_FIELD: &str = "txn-missing";

/// Returns true if `field` is reserved for transaction bookkeeping.
#[must_use]
pub fn is_reserved(field: &str) -> bool {
    field.starts_with(RESERVED_PREFIX)
}

/// Filter matching documents that logically exist (i.e. are not stubs).
///
/// Combine it with user conditions when reading a collection managed by
/// a [`crate::Runner`]:
///
/// ```rust
/// let rich = doctxn_core::present().gte("balance", 1000);
/// assert_eq!(rich.conditions().len(), 2);
/// ```
#[must_use]
pub fn present() -> Filter {
    Filter::new().exists(MISSING_FIELD, false)
}

/// Returns the user-visible fields of a document, or `None` for a stub.
#[must_use]
pub fn user_fields(doc: &Document) -> Option<Fields> {
    if is_stub(doc) {
        return None;
    }
    Some(
        doc.fields
            .iter()
            .filter(|(name, _)| !is_reserved(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
    )
}

/// Returns true if the document is a stub.
#[must_use]
pub fn is_stub(doc: &Document) -> bool {
    doc.get(MISSING_FIELD).and_then(Value::as_bool) == Some(true)
}

/// Returns the revision of a document, if any transaction wrote one.
#[must_use]
pub fn revision(doc: &Document) -> Option<String> {
    doc.get(REV_FIELD)
        .and_then(Value::as_text)
        .map(str::to_string)
}

/// Returns the pending queue of a document.
///
/// # Errors
///
/// Returns [`TxnError::Corrupted`] if the queue is not an array of text.
pub fn pending_queue(doc: &Document) -> TxnResult<Vec<TxnId>> {
    let Some(value) = doc.get(QUEUE_FIELD) else {
        return Ok(Vec::new());
    };
    let items = value.as_array().ok_or_else(|| {
        TxnError::corrupted(format!("queue of document {} is a {}", doc.id, value.type_name()))
    })?;
    items
        .iter()
        .map(|item| {
            item.as_text().map(TxnId::from).ok_or_else(|| {
                TxnError::corrupted(format!("queue of document {} holds a {}", doc.id, item.type_name()))
            })
        })
        .collect()
}

/// Where a transaction sits in a document's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Position {
    /// First in line.
    Head,
    /// Queued behind the given transaction.
    Behind(TxnId),
    /// Not queued (or the document is gone).
    Absent,
}

/// Appends `txn` to the queue of a document unless already queued,
/// creating a stub when the document does not exist.
pub(crate) fn enqueue<S: DocumentStore + ?Sized>(
    store: &S,
    collection: &str,
    id: &DocId,
    txn: &TxnId,
) -> TxnResult<()> {
    let token = txn.token();
    loop {
        let pushed = store.update_if(
            collection,
            id,
            &Filter::new().not_contains(QUEUE_FIELD, token.clone()),
            &Mutation::new().push(QUEUE_FIELD, token.clone()),
        )?;
        if pushed {
            trace!(txn = %txn, collection, doc = %id, "queued");
            return Ok(());
        }
        match store.get(collection, id)? {
            Some(doc) => {
                if pending_queue(&doc)?.contains(txn) {
                    return Ok(());
                }
            }
            None => {
                let stub = Document::new(id.clone())
                    .field(QUEUE_FIELD, vec![token.clone()])
                    .field(REV_FIELD, uuid::Uuid::new_v4().simple().to_string())
                    .field(MISSING_FIELD, true);
                if store.insert_if_absent(collection, stub)? {
                    trace!(txn = %txn, collection, doc = %id, "queued on new stub");
                    return Ok(());
                }
            }
        }
    }
}

/// Reads the position of `txn` in a document's queue.
pub(crate) fn position<S: DocumentStore + ?Sized>(
    store: &S,
    collection: &str,
    id: &DocId,
    txn: &TxnId,
) -> TxnResult<Position> {
    let Some(doc) = store.get(collection, id)? else {
        return Ok(Position::Absent);
    };
    let pending = pending_queue(&doc)?;
    Ok(match pending.iter().position(|t| t == txn) {
        None => Position::Absent,
        Some(0) => Position::Head,
        Some(_) => Position::Behind(pending[0].clone()),
    })
}

/// Removes `txn` from a document's queue. Returns false if it was not there.
pub(crate) fn dequeue<S: DocumentStore + ?Sized>(
    store: &S,
    collection: &str,
    id: &DocId,
    txn: &TxnId,
) -> TxnResult<bool> {
    let token = txn.token();
    let pulled = store.update_if(
        collection,
        id,
        &Filter::new().contains(QUEUE_FIELD, token.clone()),
        &Mutation::new().pull(QUEUE_FIELD, token),
    )?;
    if pulled {
        trace!(txn = %txn, collection, doc = %id, "dequeued");
    }
    Ok(pulled)
}

/// Deletes a document if it is a stub with an empty queue.
pub(crate) fn collect_stub<S: DocumentStore + ?Sized>(
    store: &S,
    collection: &str,
    id: &DocId,
) -> TxnResult<bool> {
    let drained = Filter::new()
        .eq(MISSING_FIELD, true)
        .eq(QUEUE_FIELD, Value::Array(Vec::new()));
    let removed = store.remove_if(collection, id, &drained)?;
    if removed {
        trace!(collection, doc = %id, "collected stub");
    }
    Ok(removed)
}
