//! Documents and document identifiers.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Field map of a document.
pub type Fields = BTreeMap<String, Value>;

/// Identifier of a document within a collection.
///
/// Identifiers are totally ordered (integers before text) so that callers
/// can visit documents in a fixed global order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DocId {
    /// Integer identifier.
    Int(i64),
    /// Text identifier.
    Text(String),
}

impl DocId {
    /// Returns true if this identifier is usable as a document key.
    ///
    /// Empty text identifiers are rejected.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match self {
            DocId::Int(_) => true,
            DocId::Text(s) => !s.is_empty(),
        }
    }

    /// Returns the integer form, if this is an integer id.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            DocId::Int(n) => Some(*n),
            DocId::Text(_) => None,
        }
    }

    /// Returns the text form, if this is a text id.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            DocId::Int(_) => None,
            DocId::Text(s) => Some(s),
        }
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocId::Int(n) => write!(f, "{n}"),
            DocId::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for DocId {
    fn from(n: i64) -> Self {
        DocId::Int(n)
    }
}

impl From<i32> for DocId {
    fn from(n: i32) -> Self {
        DocId::Int(i64::from(n))
    }
}

impl From<String> for DocId {
    fn from(s: String) -> Self {
        DocId::Text(s)
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        DocId::Text(s.to_string())
    }
}

/// A stored document: an identifier plus its fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// The document identifier.
    pub id: DocId,
    /// The document fields.
    pub fields: Fields,
}

impl Document {
    /// Creates an empty document.
    pub fn new(id: impl Into<DocId>) -> Self {
        Self {
            id: id.into(),
            fields: Fields::new(),
        }
    }

    /// Creates a document with the given fields.
    pub fn with_fields(id: impl Into<DocId>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns a field value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns an integer field value.
    pub fn get_integer(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_integer)
    }

    /// Sets a field value, returning the previous one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }
}
