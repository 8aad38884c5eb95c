//! In-memory document store for testing and simulation.

use crate::backend::DocumentStore;
use crate::document::{DocId, Document};
use crate::error::StoreResult;
use crate::filter::Filter;
use crate::mutation::Mutation;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

type Collection = BTreeMap<DocId, Document>;

/// An in-memory document store.
///
/// All collections live behind a single lock, so every operation is atomic
/// (which is stronger than the per-document atomicity the trait requires).
/// Reads return copies; callers never observe later writes through them.
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use doctxn_store::{DocId, Document, DocumentStore, Filter, InMemoryStore, Mutation};
///
/// let store = InMemoryStore::new();
/// assert!(store.insert_if_absent("accounts", Document::new(1).field("balance", 300)).unwrap());
///
/// let id = DocId::from(1);
/// let debit = Mutation::new().inc("balance", -100);
/// assert!(store.update_if("accounts", &id, &Filter::new().gte("balance", 100), &debit).unwrap());
/// assert_eq!(store.get("accounts", &id).unwrap().unwrap().get_integer("balance"), Some(200));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for InMemoryStore {
    fn insert_if_absent(&self, collection: &str, doc: Document) -> StoreResult<bool> {
        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.contains_key(&doc.id) {
            return Ok(false);
        }
        docs.insert(doc.id.clone(), doc);
        Ok(true)
    }

    fn update_if(
        &self,
        collection: &str,
        id: &DocId,
        filter: &Filter,
        mutation: &Mutation,
    ) -> StoreResult<bool> {
        let mut collections = self.collections.write();
        let Some(doc) = collections.get_mut(collection).and_then(|docs| docs.get_mut(id)) else {
            return Ok(false);
        };
        if !filter.matches(doc) {
            return Ok(false);
        }
        mutation.apply(&mut doc.fields)?;
        Ok(true)
    }

    fn remove_if(&self, collection: &str, id: &DocId, filter: &Filter) -> StoreResult<bool> {
        let mut collections = self.collections.write();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        match docs.get(id) {
            Some(doc) if filter.matches(doc) => {
                docs.remove(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn get(&self, collection: &str, id: &DocId) -> StoreResult<Option<Document>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    fn find(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| filter.matches(doc))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn count(&self, collection: &str, filter: &Filter) -> StoreResult<usize> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|docs| docs.values().filter(|doc| filter.matches(doc)).count())
            .unwrap_or(0))
    }
}
