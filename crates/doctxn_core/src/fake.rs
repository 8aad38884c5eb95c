//! Non-transactional baseline runner.

use crate::error::{TxnError, TxnResult};
use crate::operation::{validate_ops, Action, Assertion, Operation};
use crate::plan;
use crate::runner::TransactionRunner;
use crate::types::TxnId;
use doctxn_store::{Document, DocumentStore, Filter, Value};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Applies operations directly, one conditional write each.
///
/// There is no record, no queue and no crash recovery: a worker killed
/// halfway leaves half a transaction behind. Assertions are evaluated up
/// front against one read of each document, then every action is written
/// guarded by its own assertion. With a single worker and no fault
/// injection this gives the same results as [`crate::Runner`], which makes
/// it useful for checking a test harness rather than the protocol.
///
/// Outcomes live in process memory only. [`FakeRunner::resume`] reports
/// the outcome of an id run by this instance, and `resume_all` does
/// nothing.
pub struct FakeRunner<S> {
    store: S,
    outcomes: Mutex<HashMap<TxnId, bool>>,
}

impl<S: DocumentStore> FakeRunner<S> {
    /// Creates a fake runner over a store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            outcomes: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn outcome(&self, id: &TxnId, applied: bool) -> TxnResult<()> {
        self.outcomes.lock().insert(id.clone(), applied);
        if applied {
            Ok(())
        } else {
            Err(TxnError::Aborted { id: id.clone() })
        }
    }

    fn check(&self, ops: &[Operation]) -> TxnResult<Result<(), String>> {
        let mut docs = BTreeMap::new();
        for op in ops {
            let key = op.key();
            if !docs.contains_key(&key) {
                let current = self.store.get(&op.collection, &op.id)?.map(|d| d.fields);
                docs.insert(key, current);
            }
        }
        Ok(plan::simulate(ops, docs).map(|_| ()))
    }

    fn write(&self, op: &Operation) -> TxnResult<bool> {
        let guard = match &op.assert {
            Assertion::Matches(filter) => filter.clone(),
            Assertion::None | Assertion::DocExists | Assertion::DocMissing => Filter::new(),
        };
        let written = match &op.action {
            Action::None => true,
            Action::Insert(fields) => self
                .store
                .insert_if_absent(&op.collection, Document::with_fields(op.id.clone(), fields.clone()))?,
            Action::Change(mutation) => self
                .store
                .update_if(&op.collection, &op.id, &guard, mutation)?,
            Action::Remove => self.store.remove_if(&op.collection, &op.id, &guard)?,
        };
        Ok(written)
    }
}

impl<S: DocumentStore> TransactionRunner for FakeRunner<S> {
    fn run(&self, ops: &[Operation], id: &TxnId, _info: Option<Value>) -> TxnResult<()> {
        validate_ops(ops)?;
        if let Err(reason) = self.check(ops)? {
            debug!(txn = %id, %reason, "fake transaction aborted");
            return self.outcome(id, false);
        }
        for op in ops {
            if !self.write(op)? {
                debug!(txn = %id, doc = %op.id, "fake write skipped");
            }
        }
        self.outcome(id, true)
    }

    fn resume(&self, id: &TxnId) -> TxnResult<()> {
        match self.outcomes.lock().get(id) {
            Some(true) => Ok(()),
            Some(false) => Err(TxnError::Aborted { id: id.clone() }),
            None => Err(TxnError::NotFound { id: id.clone() }),
        }
    }

    fn resume_all(&self) -> TxnResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doctxn_store::{DocId, InMemoryStore, Mutation};

    const C: &str = "accounts";

    fn fake(balances: &[i64]) -> FakeRunner<InMemoryStore> {
        let store = InMemoryStore::new();
        for (i, balance) in (0i64..).zip(balances) {
            store
                .insert_if_absent(C, Document::new(i).field("balance", *balance))
                .unwrap();
        }
        FakeRunner::new(store)
    }

    fn balance(fake: &FakeRunner<InMemoryStore>, id: i64) -> Option<i64> {
        fake.store()
            .get(C, &DocId::from(id))
            .unwrap()
            .and_then(|d| d.get_integer("balance"))
    }

    #[test]
    fn fake_applies_transfer() {
        let fake = fake(&[300, 300]);
        let ops = [
            Operation::new(C, 0)
                .assert_matches(Filter::new().gte("balance", 100))
                .change(Mutation::new().inc("balance", -100)),
            Operation::new(C, 1)
                .assert_exists()
                .change(Mutation::new().inc("balance", 100)),
        ];
        let id = TxnId::from("t1");
        fake.run(&ops, &id, None).unwrap();
        assert_eq!(balance(&fake, 0), Some(200));
        assert_eq!(balance(&fake, 1), Some(400));
        assert!(fake.resume(&id).is_ok());
    }

    #[test]
    fn fake_aborts_before_writing() {
        let fake = fake(&[300]);
        let ops = [
            Operation::new(C, 0).remove(),
            Operation::new(C, 0).assert_exists(),
        ];
        let id = TxnId::from("t1");
        assert!(fake.run(&ops, &id, None).unwrap_err().is_aborted());
        assert_eq!(balance(&fake, 0), Some(300));
        assert!(fake.resume(&id).unwrap_err().is_aborted());
    }

    #[test]
    fn fake_insert_then_change() {
        let fake = fake(&[300]);
        let ops = [
            Operation::new(C, 3).assert_missing().insert_fields([("balance", 0)]),
            Operation::new(C, 0)
                .assert_matches(Filter::new().eq("balance", 300))
                .remove(),
            Operation::new(C, 3)
                .assert_exists()
                .change(Mutation::new().inc("balance", 300)),
        ];
        fake.run(&ops, &TxnId::from("t1"), None).unwrap();
        assert_eq!(balance(&fake, 0), None);
        assert_eq!(balance(&fake, 3), Some(300));
    }

    #[test]
    fn fake_resume_of_unknown_id() {
        let fake = fake(&[]);
        assert!(matches!(
            fake.resume(&TxnId::from("x")),
            Err(TxnError::NotFound { .. })
        ));
        assert!(fake.resume_all().is_ok());
    }
}
