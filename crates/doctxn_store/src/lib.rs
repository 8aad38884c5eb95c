//! # doctxn Store
//!
//! Document store abstraction used by the doctxn transaction protocol.
//!
//! A store holds named collections of documents keyed by [`DocId`]. The
//! only write primitives are **single-document conditional writes**; there
//! is no multi-document atomicity here. The transaction layer builds that
//! on top using fields it reserves inside each document.
//!
//! ## Design Principles
//!
//! - Each operation is atomic for the one document it touches
//! - A failed condition is `Ok(false)`, never an error
//! - Stores must be `Send + Sync` for concurrent access
//! - Stores do not interpret field names
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and simulation
//!
//! ## Example
//!
//! ```rust
//! use doctxn_store::{DocId, Document, DocumentStore, Filter, InMemoryStore, Mutation};
//!
//! let store = InMemoryStore::new();
//! store.insert_if_absent("accounts", Document::new(7).field("balance", 10)).unwrap();
//!
//! let changed = store
//!     .update_if("accounts", &DocId::from(7), &Filter::new().eq("balance", 10), &Mutation::new().inc("balance", 5))
//!     .unwrap();
//! assert!(changed);
//! assert_eq!(store.count("accounts", &Filter::new().gte("balance", 15)).unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod document;
mod error;
mod filter;
mod memory;
mod mutation;
mod value;

pub use backend::DocumentStore;
pub use document::{DocId, Document, Fields};
pub use error::{StoreError, StoreResult};
pub use filter::{Cmp, Condition, Filter};
pub use memory::InMemoryStore;
pub use mutation::{Mutation, Update};
pub use value::Value;
