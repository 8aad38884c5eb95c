//! Transaction runner.

use crate::config::RunnerConfig;
use crate::error::{TxnError, TxnResult};
use crate::operation::{validate_ops, Operation};
use crate::plan::{self, Decision, Plan, Snapshot};
use crate::queue::{self, Position};
use crate::record::{encode, TransactionRecord, PLAN_FIELD, STATE_FIELD};
use crate::types::{TxnId, TxnState};
use doctxn_store::{DocId, DocumentStore, Filter, Mutation, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, trace, warn};

/// The capability shared by [`Runner`] and [`crate::FakeRunner`].
pub trait TransactionRunner: Send + Sync {
    /// Runs a transaction to a terminal state.
    ///
    /// # Errors
    ///
    /// - [`TxnError::Aborted`] if an assertion failed
    /// - [`TxnError::Chaos`] if the worker was killed; resume later
    /// - [`TxnError::DuplicateTransaction`] if `id` names different operations
    /// - [`TxnError::InvalidOperation`] for a malformed operation list
    /// - [`TxnError::Store`] if the store failed
    fn run(&self, ops: &[Operation], id: &TxnId, info: Option<Value>) -> TxnResult<()>;

    /// Drives an existing transaction to a terminal state and reports it.
    ///
    /// # Errors
    ///
    /// Same as [`TransactionRunner::run`], plus [`TxnError::NotFound`].
    fn resume(&self, id: &TxnId) -> TxnResult<()>;

    /// Drives every pending transaction to a terminal state.
    ///
    /// # Errors
    ///
    /// Returns the first error other than an abort.
    fn resume_all(&self) -> TxnResult<()>;
}

/// Counts from a [`Runner::resume_all_with_summary`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeSummary {
    /// Pending transactions found.
    pub resumed: usize,
    /// Of those, how many ended applied.
    pub applied: usize,
    /// Of those, how many ended aborted.
    pub aborted: usize,
}

/// Runs multi-document transactions over a [`DocumentStore`].
///
/// The runner holds no state of its own: records, queues and revisions all
/// live in the store. Any number of runners (in any number of threads or
/// processes) may share a store, and any of them can resume a transaction
/// another one started.
///
/// ## Protocol
///
/// 1. **Preparing**: the id is queued on every touched document in
///    `(collection, id)` order, each time waiting to reach the head of the
///    queue. Transactions ahead are finished by the waiter if still pending.
/// 2. **Prepared**: operations are evaluated in submission order and the
///    outcome is recorded with a compare-and-set on the record state.
/// 3. **Applying** / **Aborting**: each document gets one revision-guarded
///    write that also releases its queue slot.
///
/// Every write is conditional, so each step can be repeated by anyone.
///
/// # Example
///
/// ```rust
/// use doctxn_core::{Operation, Runner, TxnId};
/// use doctxn_store::{Document, DocumentStore, InMemoryStore, Filter, Mutation};
///
/// let runner = Runner::with_collection(InMemoryStore::new(), "txns");
/// for i in 0..2 {
///     runner.store().insert_if_absent("accounts", Document::new(i).field("balance", 300)).unwrap();
/// }
/// let ops = [
///     Operation::new("accounts", 0)
///         .assert_matches(Filter::new().gte("balance", 100))
///         .change(Mutation::new().inc("balance", -100)),
///     Operation::new("accounts", 1)
///         .assert_exists()
///         .change(Mutation::new().inc("balance", 100)),
/// ];
/// runner.run(&ops, &TxnId::from("t1"), None).unwrap();
/// ```
pub struct Runner<S> {
    store: S,
    config: RunnerConfig,
}

impl<S: DocumentStore> Runner<S> {
    /// Creates a runner.
    pub fn new(store: S, config: RunnerConfig) -> Self {
        Self { store, config }
    }

    /// Creates a runner keeping its records in `collection`.
    pub fn with_collection(store: S, collection: impl Into<String>) -> Self {
        Self::new(store, RunnerConfig::new().collection(collection))
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Persists and runs a transaction. See [`TransactionRunner::run`].
    ///
    /// Re-running an id with identical operations resumes it instead.
    ///
    /// # Errors
    ///
    /// See [`TransactionRunner::run`].
    pub fn run(&self, ops: &[Operation], id: &TxnId, info: Option<Value>) -> TxnResult<()> {
        if id.is_empty() {
            return Err(TxnError::invalid_operation("empty transaction id"));
        }
        validate_ops(ops)?;
        if let Some(op) = ops.iter().find(|op| op.collection == self.config.collection) {
            return Err(TxnError::invalid_operation(format!(
                "operation on {}/{} targets the transaction record collection",
                op.collection, op.id
            )));
        }

        let record = TransactionRecord::new(id.clone(), ops.to_vec(), info);
        if self
            .store
            .insert_if_absent(&self.config.collection, record.to_document()?)?
        {
            debug!(txn = %id, ops = ops.len(), "transaction recorded");
        } else {
            let existing = self.load(id)?;
            if existing.ops != ops {
                return Err(TxnError::DuplicateTransaction { id: id.clone() });
            }
            debug!(txn = %id, state = %existing.state, "transaction already recorded");
        }
        self.flush(id)
    }

    /// Resumes a transaction. See [`TransactionRunner::resume`].
    ///
    /// # Errors
    ///
    /// See [`TransactionRunner::resume`].
    pub fn resume(&self, id: &TxnId) -> TxnResult<()> {
        self.flush(id)
    }

    /// Resumes every pending transaction, oldest first.
    ///
    /// # Errors
    ///
    /// Returns the first error other than an abort.
    pub fn resume_all_with_summary(&self) -> TxnResult<ResumeSummary> {
        let mut summary = ResumeSummary::default();
        for record in self.pending_records()? {
            summary.resumed += 1;
            match self.flush(&record.id) {
                Ok(()) => summary.applied += 1,
                Err(TxnError::Aborted { .. }) => summary.aborted += 1,
                Err(err) => return Err(err),
            }
        }
        info!(
            resumed = summary.resumed,
            applied = summary.applied,
            aborted = summary.aborted,
            "resumed pending transactions"
        );
        Ok(summary)
    }

    /// Reads the record of a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the record is malformed.
    pub fn record(&self, id: &TxnId) -> TxnResult<Option<TransactionRecord>> {
        self.store
            .get(&self.config.collection, &id.doc_id())?
            .map(|doc| TransactionRecord::from_document(&doc))
            .transpose()
    }

    /// Returns the ids of non-terminal transactions, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or a record is malformed.
    pub fn pending(&self) -> TxnResult<Vec<TxnId>> {
        Ok(self
            .pending_records()?
            .into_iter()
            .map(|record| record.id)
            .collect())
    }

    fn pending_records(&self) -> TxnResult<Vec<TransactionRecord>> {
        let filter = Filter::new().lte(STATE_FIELD, TxnState::LAST_PENDING_CODE);
        let mut records = self
            .store
            .find(&self.config.collection, &filter)?
            .iter()
            .map(TransactionRecord::from_document)
            .collect::<TxnResult<Vec<_>>>()?;
        records.sort_by(|a, b| (a.created_ns, &a.id).cmp(&(b.created_ns, &b.id)));
        Ok(records)
    }

    fn load(&self, id: &TxnId) -> TxnResult<TransactionRecord> {
        self.record(id)?
            .ok_or_else(|| TxnError::NotFound { id: id.clone() })
    }

    /// Drives a transaction from whatever state it is in to a terminal one.
    fn flush(&self, id: &TxnId) -> TxnResult<()> {
        let mut record = self.load(id)?;
        let mut queued_here = false;
        loop {
            match record.state {
                TxnState::Preparing => {
                    queued_here = true;
                    self.prepare(&record)?;
                }
                TxnState::Prepared => self.decide(&record)?,
                TxnState::Applying => self.apply(&record)?,
                TxnState::Aborting => {
                    self.release(&record)?;
                    self.advance(&record, TxnState::Aborted, None)?;
                }
                TxnState::Applied => {
                    // A late executor may have queued the id again.
                    if queued_here {
                        self.release(&record)?;
                    }
                    return Ok(());
                }
                TxnState::Aborted => {
                    if queued_here {
                        self.release(&record)?;
                    }
                    return Err(TxnError::Aborted { id: id.clone() });
                }
            }
            record = self.load(id)?;
        }
    }

    /// Queues the transaction on every document and waits for each head.
    fn prepare(&self, record: &TransactionRecord) -> TxnResult<()> {
        for (collection, doc) in record.documents() {
            loop {
                queue::enqueue(&self.store, &collection, &doc, &record.id)?;
                if self.wait_for_head(&collection, &doc, &record.id)? {
                    break;
                }
                // Dequeued by someone who saw the transaction move on.
                if self.load(&record.id)?.state != TxnState::Preparing {
                    return Ok(());
                }
            }
        }
        self.advance(record, TxnState::Prepared, None)?;
        Ok(())
    }

    /// Returns false if `txn` is no longer queued on the document.
    fn wait_for_head(&self, collection: &str, doc: &DocId, txn: &TxnId) -> TxnResult<bool> {
        loop {
            match queue::position(&self.store, collection, doc, txn)? {
                Position::Head => return Ok(true),
                Position::Absent => return Ok(false),
                Position::Behind(ahead) => {
                    self.settle(&ahead)?;
                    queue::dequeue(&self.store, collection, doc, &ahead)?;
                }
            }
        }
    }

    /// Brings a transaction that blocks a queue to a terminal state.
    fn settle(&self, ahead: &TxnId) -> TxnResult<()> {
        match self.record(ahead)? {
            None => warn!(txn = %ahead, "dropping queue entry without a record"),
            Some(record) if record.state.is_terminal() => {}
            Some(record) => {
                trace!(txn = %ahead, state = %record.state, "helping blocking transaction");
                match self.flush(ahead) {
                    Ok(()) | Err(TxnError::Aborted { .. }) => {}
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(())
    }

    /// Evaluates the operations and records the decision.
    fn decide(&self, record: &TransactionRecord) -> TxnResult<()> {
        let mut snapshots = BTreeMap::new();
        for (collection, doc) in record.documents() {
            let snapshot = match self.store.get(&collection, &doc)? {
                Some(current) => Snapshot {
                    rev: queue::revision(&current),
                    fields: queue::user_fields(&current),
                },
                None => Snapshot {
                    rev: None,
                    fields: None,
                },
            };
            snapshots.insert((collection, doc), snapshot);
        }

        match plan::decide(&record.ops, &snapshots) {
            Decision::Commit(plan) => {
                self.advance(record, TxnState::Applying, Some(&plan))?;
            }
            Decision::Abort(reason) => {
                if self.advance(record, TxnState::Aborting, None)? {
                    debug!(txn = %record.id, %reason, "abort decided");
                }
            }
        }
        Ok(())
    }

    /// Performs the decided writes, then marks the transaction applied.
    fn apply(&self, record: &TransactionRecord) -> TxnResult<()> {
        let plan = record.plan.as_ref().ok_or_else(|| {
            TxnError::corrupted(format!("record {} is applying without a plan", record.id))
        })?;
        for write in &plan.writes {
            if let Some(mutation) = write.mutation(&record.id) {
                let written = self
                    .store
                    .update_if(&write.collection, &write.id, &write.guard(), &mutation)?;
                if !written {
                    trace!(txn = %record.id, doc = %write.id, "write already applied");
                }
            }
            queue::dequeue(&self.store, &write.collection, &write.id, &record.id)?;
            if self.config.collect_stubs {
                queue::collect_stub(&self.store, &write.collection, &write.id)?;
            }
        }
        self.advance(record, TxnState::Applied, None)?;
        Ok(())
    }

    /// Removes the transaction from every queue it may be on.
    fn release(&self, record: &TransactionRecord) -> TxnResult<()> {
        for (collection, doc) in record.documents() {
            queue::dequeue(&self.store, &collection, &doc, &record.id)?;
            if self.config.collect_stubs {
                queue::collect_stub(&self.store, &collection, &doc)?;
            }
        }
        Ok(())
    }

    /// Moves the record from its current state to `to`. Returns false if
    /// another executor moved it first.
    fn advance(&self, record: &TransactionRecord, to: TxnState, plan: Option<&Plan>) -> TxnResult<bool> {
        let mut mutation = Mutation::new().set(STATE_FIELD, to.code());
        if let Some(plan) = plan {
            mutation = mutation.set(PLAN_FIELD, encode(plan)?);
        }
        let moved = self.store.update_if(
            &self.config.collection,
            &record.id.doc_id(),
            &Filter::new().eq(STATE_FIELD, record.state.code()),
            &mutation,
        )?;
        if moved {
            debug!(txn = %record.id, from = %record.state, to = %to, "state changed");
        }
        Ok(moved)
    }
}

impl<S: DocumentStore> TransactionRunner for Runner<S> {
    fn run(&self, ops: &[Operation], id: &TxnId, info: Option<Value>) -> TxnResult<()> {
        Runner::run(self, ops, id, info)
    }

    fn resume(&self, id: &TxnId) -> TxnResult<()> {
        Runner::resume(self, id)
    }

    fn resume_all(&self) -> TxnResult<()> {
        self.resume_all_with_summary().map(|_| ())
    }
}
