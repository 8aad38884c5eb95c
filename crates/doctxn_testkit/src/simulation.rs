//! Bank account simulation under fault injection.
//!
//! Workers move money between accounts concurrently while a
//! [`ChaosStore`] kills and delays them. Afterwards chaos is switched off,
//! every pending transaction is resumed, and the accounts are checked:
//!
//! 1. The number of accounts is unchanged
//! 2. No balance is negative
//! 3. The total balance is unchanged
//! 4. Replaying every applied change against a plain map reproduces each
//!    account's final balance exactly
//!
//! ## Usage
//!
//! ```rust
//! use doctxn_testkit::simulation::{simulate, SimParams};
//!
//! let report = simulate(&SimParams::new().workers(2).accounts(3).changes(10)).unwrap();
//! assert_eq!(report.total, 20);
//! ```

use crate::fixtures::{
    account_balances, reinsert_copy_ops, reinsert_zeroed_ops, seed_accounts, transfer_ops,
    ACCOUNTS, INITIAL_BALANCE, TXN_COLLECTION,
};
use doctxn_core::{
    present, user_fields, Chaos, ChaosStore, FakeRunner, Runner, RunnerConfig, TransactionRunner,
    TxnError, TxnId,
};
use doctxn_store::{DocId, DocumentStore, InMemoryStore, StoreError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Result type for simulations.
pub type SimResult<T> = Result<T, SimError>;

/// Errors that end a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    /// A transaction failed with something other than an abort or a kill.
    #[error("transaction error: {0}")]
    Txn(#[from] TxnError),

    /// The store failed outside of a transaction.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// No worker attempted any change.
    #[error("no operations were attempted")]
    NothingAttempted,

    /// A worker thread panicked.
    #[error("worker {worker} panicked")]
    WorkerPanicked {
        /// Index of the worker.
        worker: usize,
    },

    /// A post-condition on the accounts does not hold.
    #[error("invariant violated: {message}")]
    Invariant {
        /// What was wrong.
        message: String,
    },
}

impl SimError {
    fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }
}

/// Shape of the transactions workers submit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Move 100 between two existing accounts.
    #[default]
    Transfer,
    /// Remove an account and insert a copy under a new id.
    ReinsertCopy,
    /// Insert an empty account, remove the origin, credit the new one.
    ReinsertZeroed,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Transfer => "transfer",
            Mode::ReinsertCopy => "reinsert-copy",
            Mode::ReinsertZeroed => "reinsert-zeroed",
        })
    }
}

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct SimParams {
    /// Concurrent workers.
    pub workers: usize,
    /// Accounts seeded before the run.
    pub accounts: i64,
    /// Changes per worker; `0` runs for `duration` instead.
    pub changes: usize,
    /// How long workers run when `changes` is `0`.
    pub duration: Duration,
    /// Transaction shape.
    pub mode: Mode,
    /// Use the non-transactional [`FakeRunner`].
    pub unsafe_fake: bool,
    /// Probability of a kill around each write.
    pub kill_chance: f64,
    /// Probability of a delay before each write.
    pub slowdown_chance: f64,
    /// Length of a delay.
    pub slowdown: Duration,
    /// Seed for workloads and fault decisions.
    pub seed: Option<u64>,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            workers: 1,
            accounts: 4,
            changes: 0,
            duration: Duration::from_secs(1),
            mode: Mode::Transfer,
            unsafe_fake: false,
            kill_chance: 0.0,
            slowdown_chance: 0.0,
            slowdown: Duration::ZERO,
            seed: None,
        }
    }
}

impl SimParams {
    /// Creates default parameters: one worker, four accounts, one second.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of workers.
    #[must_use]
    pub const fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the number of accounts.
    #[must_use]
    pub const fn accounts(mut self, accounts: i64) -> Self {
        self.accounts = accounts;
        self
    }

    /// Sets the number of changes per worker.
    #[must_use]
    pub const fn changes(mut self, changes: usize) -> Self {
        self.changes = changes;
        self
    }

    /// Sets the run duration used when `changes` is `0`.
    #[must_use]
    pub const fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Sets the transaction shape.
    #[must_use]
    pub const fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Uses the fake runner.
    #[must_use]
    pub const fn unsafe_fake(mut self, fake: bool) -> Self {
        self.unsafe_fake = fake;
        self
    }

    /// Sets kill and slowdown injection.
    #[must_use]
    pub const fn chaos(mut self, kill_chance: f64, slowdown_chance: f64, slowdown: Duration) -> Self {
        self.kill_chance = kill_chance;
        self.slowdown_chance = slowdown_chance;
        self.slowdown = slowdown;
        self
    }

    /// Makes workloads and faults reproducible (up to thread scheduling).
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Highest account id workers pick from, exclusive.
    #[must_use]
    pub fn id_range(&self) -> i64 {
        match self.mode {
            Mode::Transfer => self.accounts,
            Mode::ReinsertCopy | Mode::ReinsertZeroed => self.accounts * 3 / 2,
        }
    }

    fn fault_injection(&self) -> Chaos {
        let chaos = Chaos::new()
            .kill_chance(self.kill_chance)
            .slowdown_chance(self.slowdown_chance)
            .slowdown(self.slowdown);
        match self.seed {
            Some(seed) => chaos.seed(seed),
            None => chaos,
        }
    }
}

/// One attempted change, kept for the final replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    /// Transaction id.
    pub id: TxnId,
    /// Account debited (or removed).
    pub origin: i64,
    /// Account credited (or created).
    pub target: i64,
    /// Amount moved.
    pub amount: i64,
}

/// Outcome of a successful simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimReport {
    /// Transaction shape used.
    pub mode: Mode,
    /// Whether the fake runner was used.
    pub fake: bool,
    /// Changes attempted.
    pub total: usize,
    /// Changes that ended applied.
    pub applied: usize,
    /// Changes that ended aborted.
    pub aborted: usize,
    /// Changes killed before their record was written.
    pub lost: usize,
    /// Kills injected.
    pub kills: u64,
    /// Transactions finished by the final resume pass.
    pub resumed: usize,
    /// Final balance per account.
    pub final_balances: BTreeMap<i64, i64>,
}

impl fmt::Display for SimReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total transactions: {} ({} applied, {} aborted, {} lost), {} kills, {} resumed",
            self.total, self.applied, self.aborted, self.lost, self.kills, self.resumed
        )
    }
}

type Store = Arc<ChaosStore<InMemoryStore>>;

/// Runs a simulation and checks every post-condition.
///
/// # Errors
///
/// - [`SimError::Txn`] if a worker or the resume pass hit an unexpected error
/// - [`SimError::NothingAttempted`] if no change was attempted
/// - [`SimError::Invariant`] if an account check fails
pub fn simulate(params: &SimParams) -> SimResult<SimReport> {
    let store: Store = Arc::new(ChaosStore::disabled(InMemoryStore::new()));
    seed_accounts(&*store, params.accounts, INITIAL_BALANCE)?;

    let protocol = (!params.unsafe_fake).then(|| {
        Arc::new(Runner::new(
            Arc::clone(&store),
            RunnerConfig::new().collection(TXN_COLLECTION),
        ))
    });
    let runner: Arc<dyn TransactionRunner> = match &protocol {
        Some(protocol) => Arc::clone(protocol) as Arc<dyn TransactionRunner>,
        None => Arc::new(FakeRunner::new(Arc::clone(&store))),
    };

    store.set_chaos(params.fault_injection());
    let log = run_workers(params, &store, &runner);
    let kills = store.kills();
    store.reset();
    let log = log?;
    if log.is_empty() {
        return Err(SimError::NothingAttempted);
    }

    let resumed = match &protocol {
        Some(protocol) => protocol.resume_all_with_summary()?.resumed,
        None => {
            runner.resume_all()?;
            0
        }
    };

    check_accounts(params, &*store)?;
    let (applied, aborted, lost, expected) = replay(params, &*runner, &log)?;

    let final_balances = account_balances(&*store)?;
    let ids: BTreeSet<i64> = final_balances.keys().chain(expected.keys()).copied().collect();
    for id in ids {
        let have = final_balances.get(&id).copied().unwrap_or(0);
        let want = expected.get(&id).copied().unwrap_or(0);
        if have != want {
            return Err(SimError::invariant(format!(
                "account {id} holds {have}, replay expects {want}"
            )));
        }
    }

    let report = SimReport {
        mode: params.mode,
        fake: params.unsafe_fake,
        total: log.len(),
        applied,
        aborted,
        lost,
        kills,
        resumed,
        final_balances,
    };
    info!(%report, "simulation finished");
    Ok(report)
}

fn run_workers(
    params: &SimParams,
    store: &Store,
    runner: &Arc<dyn TransactionRunner>,
) -> SimResult<Vec<BalanceChange>> {
    let stop = (params.changes == 0).then(|| Instant::now() + params.duration);
    let handles: Vec<_> = (0..params.workers)
        .map(|worker| {
            let params = params.clone();
            let store = Arc::clone(store);
            let runner = Arc::clone(runner);
            thread::spawn(move || work(worker, &params, stop, &store, &*runner))
        })
        .collect();

    let mut log = Vec::new();
    let mut first_error = None;
    for (worker, handle) in handles.into_iter().enumerate() {
        match handle.join() {
            Ok(Ok(changes)) => log.extend(changes),
            Ok(Err(err)) => {
                first_error.get_or_insert(err);
            }
            Err(_) => {
                first_error.get_or_insert(SimError::WorkerPanicked { worker });
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(log),
    }
}

fn work(
    worker: usize,
    params: &SimParams,
    stop: Option<Instant>,
    store: &Store,
    runner: &dyn TransactionRunner,
) -> SimResult<Vec<BalanceChange>> {
    let mut rng = match params.seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(worker as u64)),
        None => StdRng::from_entropy(),
    };
    let max = params.id_range().max(1);
    let mut log = Vec::new();
    loop {
        if params.changes > 0 && log.len() == params.changes {
            break;
        }
        if stop.is_some_and(|stop| Instant::now() >= stop) {
            break;
        }

        let mut change = BalanceChange {
            id: TxnId::generate(),
            origin: rng.gen_range(0..max),
            target: rng.gen_range(0..max),
            amount: 100,
        };

        let mut origin_exists = false;
        if params.mode != Mode::Transfer {
            let current = store
                .get(ACCOUNTS, &DocId::from(change.origin))?
                .as_ref()
                .and_then(user_fields);
            if let Some(fields) = current {
                change.amount = fields.get("balance").and_then(|v| v.as_integer()).unwrap_or(0);
                origin_exists = true;
            }
        }

        let ops = match (params.mode, origin_exists) {
            (Mode::ReinsertCopy, true) => reinsert_copy_ops(change.origin, change.target, change.amount),
            (Mode::ReinsertZeroed, true) => {
                reinsert_zeroed_ops(change.origin, change.target, change.amount)
            }
            _ => transfer_ops(change.origin, change.target, change.amount),
        };

        match runner.run(&ops, &change.id, None) {
            Ok(()) | Err(TxnError::Aborted { .. }) | Err(TxnError::Chaos) => {}
            Err(err) => return Err(err.into()),
        }
        debug!(worker, txn = %change.id, origin = change.origin, target = change.target, "change attempted");
        log.push(change);
    }
    Ok(log)
}

fn check_accounts(params: &SimParams, store: &ChaosStore<InMemoryStore>) -> SimResult<()> {
    let count = store.count(ACCOUNTS, &present())?;
    if count != usize::try_from(params.accounts).unwrap_or(0) {
        return Err(SimError::invariant(format!(
            "number of accounts changed from {} to {count}",
            params.accounts
        )));
    }

    let negative = store.count(ACCOUNTS, &present().lt("balance", 0))?;
    if negative != 0 {
        return Err(SimError::invariant(format!(
            "there are {negative} accounts with negative balance"
        )));
    }

    let total: i64 = account_balances(store)?.values().sum();
    if total != params.accounts * INITIAL_BALANCE {
        return Err(SimError::invariant(format!(
            "total amount of money changed from {} to {total}",
            params.accounts * INITIAL_BALANCE
        )));
    }
    Ok(())
}

type Replay = (usize, usize, usize, BTreeMap<i64, i64>);

fn replay(params: &SimParams, runner: &dyn TransactionRunner, log: &[BalanceChange]) -> SimResult<Replay> {
    let mut expected: BTreeMap<i64, i64> = (0..params.accounts).map(|i| (i, INITIAL_BALANCE)).collect();
    let (mut applied, mut aborted, mut lost) = (0, 0, 0);
    for change in log {
        match runner.resume(&change.id) {
            Ok(()) => {
                *expected.entry(change.origin).or_default() -= change.amount;
                *expected.entry(change.target).or_default() += change.amount;
                applied += 1;
            }
            Err(TxnError::Aborted { .. }) => aborted += 1,
            Err(TxnError::NotFound { .. }) => lost += 1,
            Err(err) => return Err(err.into()),
        }
    }
    Ok((applied, aborted, lost, expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_builder() {
        let params = SimParams::new()
            .workers(4)
            .accounts(10)
            .changes(5)
            .mode(Mode::ReinsertCopy)
            .chaos(0.01, 0.3, Duration::from_millis(1))
            .seed(9);
        assert_eq!(params.workers, 4);
        assert_eq!(params.id_range(), 15);
        assert_eq!(params.fault_injection().seed, Some(9));
        assert!(params.fault_injection().is_enabled());
    }

    #[test]
    fn transfer_range_is_account_count() {
        assert_eq!(SimParams::new().accounts(4).id_range(), 4);
    }

    #[test]
    fn single_worker_without_chaos_applies_something() {
        let report = simulate(&SimParams::new().changes(20).seed(1)).unwrap();
        assert_eq!(report.total, 20);
        assert_eq!(report.applied + report.aborted, 20);
        assert_eq!(report.lost, 0);
        assert_eq!(report.kills, 0);
        assert_eq!(report.final_balances.values().sum::<i64>(), 1200);
    }

    #[test]
    fn report_serializes_to_json() {
        let report = simulate(&SimParams::new().changes(3).seed(2)).unwrap();
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"mode\":\"transfer\""));
        let back: SimReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn mode_display_matches_serde() {
        for mode in [Mode::Transfer, Mode::ReinsertCopy, Mode::ReinsertZeroed] {
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{mode}\""));
        }
    }
}
