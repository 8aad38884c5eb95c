//! Document store trait definition.

use crate::document::{DocId, Document};
use crate::error::StoreResult;
use crate::filter::Filter;
use crate::mutation::Mutation;

/// A document store offering atomic single-document conditional writes.
///
/// This is the only capability the transaction protocol relies on. Stores
/// know nothing about transactions, queues or revisions; those are plain
/// fields to them.
///
/// # Invariants
///
/// - Every method is atomic with respect to the single document it touches
/// - A conditional write whose condition fails returns `Ok(false)` and
///   leaves the document unchanged
/// - `find` returns documents ordered by id
/// - Stores must be `Send + Sync` so many workers can share one instance
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing and simulation
pub trait DocumentStore: Send + Sync {
    /// Inserts `doc` unless a document with the same id exists.
    ///
    /// Returns `false` on conflict.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    fn insert_if_absent(&self, collection: &str, doc: Document) -> StoreResult<bool>;

    /// Applies `mutation` to the document if it exists and matches `filter`.
    ///
    /// Returns `false` if the document is missing or does not match.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or the mutation does
    /// not fit the matched document.
    fn update_if(
        &self,
        collection: &str,
        id: &DocId,
        filter: &Filter,
        mutation: &Mutation,
    ) -> StoreResult<bool>;

    /// Removes the document if it exists and matches `filter`.
    ///
    /// Returns `false` if the document is missing or does not match.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    fn remove_if(&self, collection: &str, id: &DocId, filter: &Filter) -> StoreResult<bool>;

    /// Reads one document.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    fn get(&self, collection: &str, id: &DocId) -> StoreResult<Option<Document>>;

    /// Returns every document of `collection` matching `filter`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    fn find(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>>;

    /// Counts documents of `collection` matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    fn count(&self, collection: &str, filter: &Filter) -> StoreResult<usize> {
        Ok(self.find(collection, filter)?.len())
    }
}

impl<S: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<S> {
    fn insert_if_absent(&self, collection: &str, doc: Document) -> StoreResult<bool> {
        (**self).insert_if_absent(collection, doc)
    }

    fn update_if(
        &self,
        collection: &str,
        id: &DocId,
        filter: &Filter,
        mutation: &Mutation,
    ) -> StoreResult<bool> {
        (**self).update_if(collection, id, filter, mutation)
    }

    fn remove_if(&self, collection: &str, id: &DocId, filter: &Filter) -> StoreResult<bool> {
        (**self).remove_if(collection, id, filter)
    }

    fn get(&self, collection: &str, id: &DocId) -> StoreResult<Option<Document>> {
        (**self).get(collection, id)
    }

    fn find(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>> {
        (**self).find(collection, filter)
    }

    fn count(&self, collection: &str, filter: &Filter) -> StoreResult<usize> {
        (**self).count(collection, filter)
    }
}
