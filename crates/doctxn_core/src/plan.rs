//! Deciding a transaction: evaluate assertions and compute final documents.

use crate::operation::{Action, Operation};
use crate::queue::{MISSING_FIELD, QUEUE_FIELD, REV_FIELD};
use crate::types::TxnId;
use doctxn_store::{DocId, Fields, Filter, Mutation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `(collection, id)` of a document, ordered the way documents are visited.
pub(crate) type DocKey = (String, DocId);

/// What a document looked like when the decision was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Snapshot {
    /// Revision observed, `None` if no transaction ever wrote one.
    pub rev: Option<String>,
    /// User fields, `None` if the document does not logically exist.
    pub fields: Option<Fields>,
}

/// Final effect of a committed transaction on one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// The document is not written.
    Unchanged,
    /// The user fields are replaced by these.
    Replace(Fields),
    /// The document is removed (turned into a stub).
    Remove,
}

/// The decided write for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedWrite {
    /// Collection holding the document.
    pub collection: String,
    /// Document id.
    pub id: DocId,
    /// Revision the write is guarded on.
    pub observed_rev: Option<String>,
    /// User fields present when the decision was taken.
    pub previous_fields: Vec<String>,
    /// Effect to apply.
    pub effect: Effect,
}

impl PlannedWrite {
    /// Guard matching the document exactly as it was observed.
    pub(crate) fn guard(&self) -> Filter {
        match &self.observed_rev {
            Some(rev) => Filter::new().eq(REV_FIELD, rev.as_str()),
            None => Filter::new().exists(REV_FIELD, false),
        }
    }

    /// The single write performing the effect and releasing the queue slot.
    ///
    /// Returns `None` for [`Effect::Unchanged`].
    pub(crate) fn mutation(&self, txn: &TxnId) -> Option<Mutation> {
        if self.effect == Effect::Unchanged {
            return None;
        }
        let mut mutation = Mutation::new();
        for name in &self.previous_fields {
            mutation = mutation.unset(name.clone());
        }
        mutation = match &self.effect {
            Effect::Unchanged => mutation,
            Effect::Replace(fields) => fields
                .iter()
                .fold(mutation, |m, (name, value)| m.set(name.clone(), value.clone()))
                .unset(MISSING_FIELD),
            Effect::Remove => mutation.set(MISSING_FIELD, true),
        };
        Some(
            mutation
                .set(REV_FIELD, txn.as_str())
                .pull(QUEUE_FIELD, txn.token()),
        )
    }
}

/// The committed outcome of a transaction: one entry per touched document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Writes in document visiting order.
    pub writes: Vec<PlannedWrite>,
}

/// Outcome of evaluating a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Decision {
    /// Every assertion held.
    Commit(Plan),
    /// An assertion failed or a change could not be applied.
    Abort(String),
}

/// Runs the operations in submission order against an evolving copy of
/// the documents. Each assertion sees the effects of earlier operations.
///
/// Returns the final user fields per document, or the reason for aborting.
pub(crate) fn simulate(
    ops: &[Operation],
    mut docs: BTreeMap<DocKey, Option<Fields>>,
) -> Result<BTreeMap<DocKey, Option<Fields>>, String> {
    for (index, op) in ops.iter().enumerate() {
        let state = docs.entry(op.key()).or_insert(None);
        if !op.assert.holds(state.as_ref()) {
            return Err(format!(
                "assertion of operation {index} on {}/{} failed",
                op.collection, op.id
            ));
        }
        match &op.action {
            Action::Insert(fields) => {
                if state.is_none() {
                    *state = Some(fields.clone());
                }
            }
            Action::Change(mutation) => {
                if let Some(fields) = state.as_mut() {
                    mutation.apply(fields).map_err(|err| {
                        format!("operation {index} on {}/{}: {err}", op.collection, op.id)
                    })?;
                }
            }
            Action::Remove => *state = None,
            Action::None => {}
        }
    }
    Ok(docs)
}

/// Decides a transaction against consistent snapshots of every document it
/// touches.
pub(crate) fn decide(ops: &[Operation], snapshots: &BTreeMap<DocKey, Snapshot>) -> Decision {
    let initial = snapshots
        .iter()
        .map(|(key, snap)| (key.clone(), snap.fields.clone()))
        .collect();
    let finals = match simulate(ops, initial) {
        Ok(finals) => finals,
        Err(reason) => return Decision::Abort(reason),
    };

    let writes = finals
        .into_iter()
        .map(|((collection, id), after)| {
            let snap = snapshots.get(&(collection.clone(), id.clone()));
            let before = snap.and_then(|s| s.fields.clone());
            let effect = if before == after {
                Effect::Unchanged
            } else {
                match after {
                    Some(fields) => Effect::Replace(fields),
                    None => Effect::Remove,
                }
            };
            PlannedWrite {
                collection,
                id,
                observed_rev: snap.and_then(|s| s.rev.clone()),
                previous_fields: before.map(|f| f.into_keys().collect()).unwrap_or_default(),
                effect,
            }
        })
        .collect();
    Decision::Commit(Plan { writes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use doctxn_store::Value;

    const C: &str = "accounts";

    fn account(balance: i64) -> Option<Fields> {
        Some(Fields::from([("balance".to_string(), Value::Integer(balance))]))
    }

    fn snapshots(docs: &[(i64, Option<Fields>)]) -> BTreeMap<DocKey, Snapshot> {
        docs.iter()
            .map(|(id, fields)| {
                (
                    (C.to_string(), DocId::from(*id)),
                    Snapshot {
                        rev: Some(format!("r{id}")),
                        fields: fields.clone(),
                    },
                )
            })
            .collect()
    }

    fn transfer(from: i64, to: i64, amount: i64) -> Vec<Operation> {
        vec![
            Operation::new(C, from)
                .assert_matches(Filter::new().gte("balance", amount))
                .change(Mutation::new().inc("balance", -amount)),
            Operation::new(C, to)
                .assert_exists()
                .change(Mutation::new().inc("balance", amount)),
        ]
    }

    #[test]
    fn transfer_commits_both_sides() {
        let snaps = snapshots(&[(0, account(300)), (1, account(300))]);
        let Decision::Commit(plan) = decide(&transfer(0, 1, 100), &snaps) else {
            panic!("expected commit");
        };
        assert_eq!(plan.writes.len(), 2);
        assert_eq!(plan.writes[0].effect, Effect::Replace(account(200).unwrap()));
        assert_eq!(plan.writes[1].effect, Effect::Replace(account(400).unwrap()));
        assert_eq!(plan.writes[0].observed_rev.as_deref(), Some("r0"));
    }

    #[test]
    fn failing_assertion_aborts_whole_transaction() {
        let snaps = snapshots(&[(0, account(50)), (1, account(300))]);
        assert!(matches!(decide(&transfer(0, 1, 100), &snaps), Decision::Abort(_)));
    }

    #[test]
    fn later_failing_assertion_aborts_earlier_changes() {
        let snaps = snapshots(&[(0, account(300)), (1, None)]);
        assert!(matches!(decide(&transfer(0, 1, 100), &snaps), Decision::Abort(_)));
    }

    #[test]
    fn assertions_see_earlier_operations() {
        // Insert zeroed target, remove origin, then credit the new target.
        let snaps = snapshots(&[(0, account(300)), (5, None)]);
        let ops = vec![
            Operation::new(C, 5).assert_missing().insert(account(0).unwrap()),
            Operation::new(C, 0)
                .assert_matches(Filter::new().eq("balance", 300))
                .remove(),
            Operation::new(C, 5)
                .assert_exists()
                .change(Mutation::new().inc("balance", 300)),
        ];
        let Decision::Commit(plan) = decide(&ops, &snaps) else {
            panic!("expected commit");
        };
        assert_eq!(plan.writes[0].effect, Effect::Remove);
        assert_eq!(plan.writes[0].previous_fields, vec!["balance".to_string()]);
        assert_eq!(plan.writes[1].effect, Effect::Replace(account(300).unwrap()));
        assert!(plan.writes[1].previous_fields.is_empty());
    }

    #[test]
    fn ignored_actions_leave_documents_unchanged() {
        let snaps = snapshots(&[(0, account(1)), (1, None)]);
        let ops = vec![
            Operation::new(C, 0).insert(account(9).unwrap()),
            Operation::new(C, 1).change(Mutation::new().inc("balance", 1)),
            Operation::new(C, 1).remove(),
        ];
        let Decision::Commit(plan) = decide(&ops, &snaps) else {
            panic!("expected commit");
        };
        assert!(plan.writes.iter().all(|w| w.effect == Effect::Unchanged));
        assert!(plan.writes.iter().all(|w| w.mutation(&TxnId::from("t")).is_none()));
    }

    #[test]
    fn unapplicable_change_aborts() {
        let snaps = snapshots(&[(0, Some(Fields::from([("balance".to_string(), Value::from("x"))])))]);
        let ops = vec![Operation::new(C, 0).change(Mutation::new().inc("balance", 1))];
        assert!(matches!(decide(&ops, &snaps), Decision::Abort(_)));
    }

    #[test]
    fn planned_write_stamps_revision_and_releases_queue() {
        let write = PlannedWrite {
            collection: C.into(),
            id: DocId::from(0),
            observed_rev: None,
            previous_fields: vec!["balance".into()],
            effect: Effect::Remove,
        };
        let txn = TxnId::from("t9");
        let mut fields = Fields::from([
            ("balance".to_string(), Value::Integer(3)),
            (QUEUE_FIELD.to_string(), Value::Array(vec![txn.token()])),
        ]);
        assert!(write.guard().matches_fields(&fields));
        write.mutation(&txn).unwrap().apply(&mut fields).unwrap();
        assert_eq!(fields.get(REV_FIELD), Some(&Value::from("t9")));
        assert_eq!(fields.get(MISSING_FIELD), Some(&Value::Bool(true)));
        assert_eq!(fields.get(QUEUE_FIELD), Some(&Value::Array(vec![])));
        assert!(fields.get("balance").is_none());
        assert!(!write.guard().matches_fields(&fields));
    }
}
