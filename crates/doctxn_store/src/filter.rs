//! Document predicates.

use crate::document::{Document, Fields};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A comparison applied to a single field.
///
/// Ordering comparisons only match integer fields; a field holding any
/// other type never satisfies `Gt`, `Gte`, `Lt` or `Lte`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cmp {
    /// Field equals the value. A missing field never matches.
    Eq(Value),
    /// Field is missing or differs from the value.
    Ne(Value),
    /// Integer field is greater than the operand.
    Gt(i64),
    /// Integer field is greater than or equal to the operand.
    Gte(i64),
    /// Integer field is less than the operand.
    Lt(i64),
    /// Integer field is less than or equal to the operand.
    Lte(i64),
    /// Field presence (`true`) or absence (`false`).
    Exists(bool),
    /// Array field contains the value.
    Contains(Value),
    /// Field is not an array containing the value (missing fields match).
    NotContains(Value),
}

impl Cmp {
    /// Evaluates this comparison against an optional field value.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        match self {
            Cmp::Eq(expected) => value == Some(expected),
            Cmp::Ne(expected) => value != Some(expected),
            Cmp::Gt(n) => value.and_then(Value::as_integer).is_some_and(|v| v > *n),
            Cmp::Gte(n) => value.and_then(Value::as_integer).is_some_and(|v| v >= *n),
            Cmp::Lt(n) => value.and_then(Value::as_integer).is_some_and(|v| v < *n),
            Cmp::Lte(n) => value.and_then(Value::as_integer).is_some_and(|v| v <= *n),
            Cmp::Exists(present) => value.is_some() == *present,
            Cmp::Contains(item) => value
                .and_then(Value::as_array)
                .is_some_and(|items| items.contains(item)),
            Cmp::NotContains(item) => !value
                .and_then(Value::as_array)
                .is_some_and(|items| items.contains(item)),
        }
    }
}

/// A condition on one named field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Field name.
    pub field: String,
    /// Comparison to apply.
    pub cmp: Cmp,
}

/// A conjunction of field conditions.
///
/// An empty filter matches every existing document.
///
/// # Example
///
/// ```rust
/// use doctxn_store::{Document, Filter};
///
/// let filter = Filter::new().gte("balance", 100).eq("owner", "ann");
/// let doc = Document::new(1).field("balance", 300).field("owner", "ann");
/// assert!(filter.matches(&doc));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    /// Creates an empty filter that matches any document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a condition.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, cmp: Cmp) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            cmp,
        });
        self
    }

    /// Adds an equality condition.
    #[must_use]
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Cmp::Eq(value.into()))
    }

    /// Adds an inequality condition.
    #[must_use]
    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Cmp::Ne(value.into()))
    }

    /// Adds a greater-than condition.
    #[must_use]
    pub fn gt(self, field: impl Into<String>, n: i64) -> Self {
        self.with(field, Cmp::Gt(n))
    }

    /// Adds a greater-or-equal condition.
    #[must_use]
    pub fn gte(self, field: impl Into<String>, n: i64) -> Self {
        self.with(field, Cmp::Gte(n))
    }

    /// Adds a less-than condition.
    #[must_use]
    pub fn lt(self, field: impl Into<String>, n: i64) -> Self {
        self.with(field, Cmp::Lt(n))
    }

    /// Adds a less-or-equal condition.
    #[must_use]
    pub fn lte(self, field: impl Into<String>, n: i64) -> Self {
        self.with(field, Cmp::Lte(n))
    }

    /// Adds a presence condition.
    #[must_use]
    pub fn exists(self, field: impl Into<String>, present: bool) -> Self {
        self.with(field, Cmp::Exists(present))
    }

    /// Adds an array-membership condition.
    #[must_use]
    pub fn contains(self, field: impl Into<String>, item: impl Into<Value>) -> Self {
        self.with(field, Cmp::Contains(item.into()))
    }

    /// Adds an array-non-membership condition.
    #[must_use]
    pub fn not_contains(self, field: impl Into<String>, item: impl Into<Value>) -> Self {
        self.with(field, Cmp::NotContains(item.into()))
    }

    /// Returns the conditions of this filter.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Returns true if the filter has no conditions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluates the filter against a document.
    pub fn matches(&self, doc: &Document) -> bool {
        self.matches_fields(&doc.fields)
    }

    /// Evaluates the filter against a bare field map.
    pub fn matches_fields(&self, fields: &Fields) -> bool {
        self.conditions
            .iter()
            .all(|c| c.cmp.matches(fields.get(&c.field)))
    }
}
