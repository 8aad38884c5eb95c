//! Document mutations.

use crate::document::Fields;
use crate::error::{StoreError, StoreResult};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A single field update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Update {
    /// Set a field to a value.
    Set(String, Value),
    /// Add a delta to an integer field. A missing field is created.
    Inc(String, i64),
    /// Remove a field. Removing a missing field is a no-op.
    Unset(String),
    /// Append a value to an array field. A missing field is created.
    Push(String, Value),
    /// Remove every occurrence of a value from an array field.
    Pull(String, Value),
}

impl Update {
    /// Returns the name of the field this update targets.
    pub fn field(&self) -> &str {
        match self {
            Update::Set(f, _)
            | Update::Inc(f, _)
            | Update::Unset(f)
            | Update::Push(f, _)
            | Update::Pull(f, _) => f,
        }
    }
}

/// An ordered list of updates applied atomically to one document.
///
/// Either every update applies or the document is left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    updates: Vec<Update>,
}

impl Mutation {
    /// Creates an empty mutation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an update.
    #[must_use]
    pub fn with(mut self, update: Update) -> Self {
        self.updates.push(update);
        self
    }

    /// Adds a `Set` update.
    #[must_use]
    pub fn set(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(Update::Set(field.into(), value.into()))
    }

    /// Adds an `Inc` update.
    #[must_use]
    pub fn inc(self, field: impl Into<String>, delta: i64) -> Self {
        self.with(Update::Inc(field.into(), delta))
    }

    /// Adds an `Unset` update.
    #[must_use]
    pub fn unset(self, field: impl Into<String>) -> Self {
        self.with(Update::Unset(field.into()))
    }

    /// Adds a `Push` update.
    #[must_use]
    pub fn push(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(Update::Push(field.into(), value.into()))
    }

    /// Adds a `Pull` update.
    #[must_use]
    pub fn pull(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(Update::Pull(field.into(), value.into()))
    }

    /// Returns the updates in application order.
    pub fn updates(&self) -> &[Update] {
        &self.updates
    }

    /// Returns true if the mutation has no updates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Applies the mutation to a field map.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidMutation`] if an update does not fit the
    /// current field type (e.g. `Inc` on text) or overflows. In that case
    /// `fields` is left unchanged.
    pub fn apply(&self, fields: &mut Fields) -> StoreResult<()> {
        let mut staged = fields.clone();
        for update in &self.updates {
            apply_one(&mut staged, update)?;
        }
        *fields = staged;
        Ok(())
    }
}

fn apply_one(fields: &mut Fields, update: &Update) -> StoreResult<()> {
    match update {
        Update::Set(field, value) => {
            fields.insert(field.clone(), value.clone());
        }
        Update::Inc(field, delta) => {
            let current = match fields.get(field) {
                None => 0,
                Some(Value::Integer(n)) => *n,
                Some(other) => {
                    return Err(StoreError::invalid_mutation(format!(
                        "cannot increment field {field:?} holding {}",
                        other.type_name()
                    )))
                }
            };
            let next = current.checked_add(*delta).ok_or_else(|| {
                StoreError::invalid_mutation(format!("increment of field {field:?} overflows"))
            })?;
            fields.insert(field.clone(), Value::Integer(next));
        }
        Update::Unset(field) => {
            fields.remove(field);
        }
        Update::Push(field, value) => match fields.get_mut(field) {
            None => {
                fields.insert(field.clone(), Value::Array(vec![value.clone()]));
            }
            Some(Value::Array(items)) => items.push(value.clone()),
            Some(other) => {
                return Err(StoreError::invalid_mutation(format!(
                    "cannot push to field {field:?} holding {}",
                    other.type_name()
                )))
            }
        },
        Update::Pull(field, value) => match fields.get_mut(field) {
            None => {}
            Some(Value::Array(items)) => items.retain(|item| item != value),
            Some(other) => {
                return Err(StoreError::invalid_mutation(format!(
                    "cannot pull from field {field:?} holding {}",
                    other.type_name()
                )))
            }
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn inc_creates_missing_field() {
        let mut f = Fields::new();
        Mutation::new().inc("balance", 5).apply(&mut f).unwrap();
        assert_eq!(f.get("balance"), Some(&Value::Integer(5)));
    }

    #[test]
    fn inc_adds_delta() {
        let mut f = fields(&[("balance", Value::Integer(300))]);
        Mutation::new().inc("balance", -100).apply(&mut f).unwrap();
        assert_eq!(f.get("balance"), Some(&Value::Integer(200)));
    }

    #[test]
    fn failed_update_leaves_fields_untouched() {
        let mut f = fields(&[("balance", Value::Integer(1)), ("name", Value::from("x"))]);
        let before = f.clone();
        let result = Mutation::new()
            .inc("balance", 1)
            .inc("name", 1)
            .apply(&mut f);
        assert!(matches!(result, Err(StoreError::InvalidMutation { .. })));
        assert_eq!(f, before);
    }

    #[test]
    fn inc_overflow_is_rejected() {
        let mut f = fields(&[("n", Value::Integer(i64::MAX))]);
        assert!(Mutation::new().inc("n", 1).apply(&mut f).is_err());
    }

    #[test]
    fn push_and_pull() {
        let mut f = Fields::new();
        Mutation::new()
            .push("q", "a")
            .push("q", "b")
            .push("q", "a")
            .apply(&mut f)
            .unwrap();
        Mutation::new().pull("q", "a").apply(&mut f).unwrap();
        assert_eq!(f.get("q"), Some(&Value::Array(vec![Value::from("b")])));
    }

    #[test]
    fn set_and_unset() {
        let mut f = fields(&[("a", Value::Integer(1))]);
        Mutation::new()
            .set("b", true)
            .unset("a")
            .unset("never-there")
            .apply(&mut f)
            .unwrap();
        assert_eq!(f, fields(&[("b", Value::Bool(true))]));
    }

    #[test]
    fn update_field_names() {
        assert_eq!(Update::Inc("x".into(), 1).field(), "x");
        assert_eq!(Update::Unset("y".into()).field(), "y");
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn increments_sum_in_any_order(deltas in prop::collection::vec(-1000i64..1000, 0..20)) {
                let mut forward = Fields::new();
                let mut backward = Fields::new();
                for d in &deltas {
                    Mutation::new().inc("n", *d).apply(&mut forward).unwrap();
                }
                for d in deltas.iter().rev() {
                    Mutation::new().inc("n", *d).apply(&mut backward).unwrap();
                }
                let total: i64 = deltas.iter().sum();
                let expected = if deltas.is_empty() { None } else { Some(&Value::Integer(total)) };
                prop_assert_eq!(forward.get("n"), expected);
                prop_assert_eq!(forward, backward);
            }

            #[test]
            fn pull_removes_every_occurrence(items in prop::collection::vec(0i64..4, 0..16), target in 0i64..4) {
                let mut f = Fields::new();
                f.insert("q".into(), Value::Array(items.iter().copied().map(Value::Integer).collect()));
                Mutation::new().pull("q", target).apply(&mut f).unwrap();
                let left = f.get("q").and_then(Value::as_array).unwrap();
                prop_assert!(!left.contains(&Value::Integer(target)));
                prop_assert_eq!(left.len(), items.iter().filter(|i| **i != target).count());
            }
        }
    }
}
