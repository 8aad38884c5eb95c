//! Integration tests for the transaction protocol.

use doctxn_core::{
    present, Chaos, ChaosStore, Operation, Runner, RunnerConfig, TransactionRunner, TxnError,
    TxnId, TxnState,
};
use doctxn_store::{DocId, Document, DocumentStore, Filter, InMemoryStore, Mutation};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

const ACCOUNTS: &str = "accounts";

type SharedStore = Arc<ChaosStore<InMemoryStore>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("doctxn_core=debug")
        .try_init();
}

fn bank(accounts: i64, balance: i64) -> (SharedStore, Runner<SharedStore>) {
    let store = Arc::new(ChaosStore::disabled(InMemoryStore::new()));
    for i in 0..accounts {
        store
            .inner()
            .insert_if_absent(ACCOUNTS, Document::new(i).field("balance", balance))
            .unwrap();
    }
    let runner = Runner::new(Arc::clone(&store), RunnerConfig::default());
    (store, runner)
}

fn transfer(from: i64, to: i64, amount: i64) -> Vec<Operation> {
    vec![
        Operation::new(ACCOUNTS, from)
            .assert_matches(Filter::new().gte("balance", amount))
            .change(Mutation::new().inc("balance", -amount)),
        Operation::new(ACCOUNTS, to)
            .assert_exists()
            .change(Mutation::new().inc("balance", amount)),
    ]
}

fn balances<S: DocumentStore>(store: &S) -> HashMap<i64, i64> {
    store
        .find(ACCOUNTS, &present())
        .unwrap()
        .into_iter()
        .map(|doc| {
            let id = doc.id.as_int().unwrap();
            (id, doc.get_integer("balance").unwrap())
        })
        .collect()
}

/// Replays every applied transfer against a plain map.
fn replay<S: DocumentStore>(
    runner: &Runner<S>,
    accounts: i64,
    initial: i64,
    log: &[(TxnId, i64, i64, i64)],
) -> HashMap<i64, i64> {
    let mut expected: HashMap<i64, i64> = (0..accounts).map(|i| (i, initial)).collect();
    for (id, from, to, amount) in log {
        match runner.resume(id) {
            Ok(()) => {
                *expected.entry(*from).or_default() -= amount;
                *expected.entry(*to).or_default() += amount;
            }
            Err(TxnError::Aborted { .. }) | Err(TxnError::NotFound { .. }) => {}
            Err(err) => panic!("resuming {id} failed: {err}"),
        }
    }
    expected
}

#[test]
fn doc_missing_failure_leaves_documents_unchanged() {
    init_tracing();
    let (store, runner) = bank(2, 300);
    let ops = [
        Operation::new(ACCOUNTS, 0)
            .assert_exists()
            .change(Mutation::new().inc("balance", -300)),
        Operation::new(ACCOUNTS, 1)
            .assert_missing()
            .insert_fields([("balance", 300)]),
    ];
    let before = store.find(ACCOUNTS, &Filter::new()).unwrap();

    let err = runner.run(&ops, &TxnId::from("t1"), None).unwrap_err();
    assert!(err.is_aborted());

    let after = store.find(ACCOUNTS, &Filter::new()).unwrap();
    assert_eq!(balances(&*store), HashMap::from([(0, 300), (1, 300)]));
    assert_eq!(after.len(), before.len());
    for (b, a) in before.iter().zip(&after) {
        assert_eq!(doctxn_core::user_fields(b), doctxn_core::user_fields(a));
    }
}

#[test]
fn interrupted_transaction_resumes_to_uninterrupted_result() {
    init_tracing();
    let ops = transfer(0, 1, 100);

    let (_, clean) = bank(2, 300);
    clean.run(&ops, &TxnId::from("t1"), None).unwrap();

    for kill_at in 1..=8 {
        let (store, runner) = bank(2, 300);
        store.kill_after_writes(kill_at);
        let id = TxnId::from("t1");
        match runner.run(&ops, &id, None) {
            Ok(()) | Err(TxnError::Chaos) => {}
            Err(err) => panic!("unexpected error at kill point {kill_at}: {err}"),
        }
        store.reset();
        runner.resume_all().unwrap();
        runner.resume(&id).unwrap();
        assert_eq!(
            balances(&*store),
            balances(clean.store()),
            "kill point {kill_at}"
        );
        assert!(runner.pending().unwrap().is_empty());
    }
}

#[test]
fn kill_before_record_leaves_nothing() {
    let (store, runner) = bank(2, 300);
    store.set_chaos(Chaos::new().kill_chance(1.0));
    let id = TxnId::from("t1");
    assert!(runner.run(&transfer(0, 1, 100), &id, None).unwrap_err().is_chaos());
    store.reset();

    assert!(matches!(runner.resume(&id), Err(TxnError::NotFound { .. })));
    assert!(runner.record(&id).unwrap().is_none());
    assert_eq!(balances(&*store), HashMap::from([(0, 300), (1, 300)]));
}

#[test]
fn concurrent_resume_is_idempotent() {
    let (store, runner) = bank(2, 300);
    let id = TxnId::from("t1");
    store.kill_after_writes(4);
    assert!(runner.run(&transfer(0, 1, 100), &id, None).unwrap_err().is_chaos());

    let runner = Arc::new(runner);
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let runner = Arc::clone(&runner);
            let id = id.clone();
            thread::spawn(move || runner.resume(&id).is_ok())
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap());
    }
    let settled = balances(&*store);
    runner.resume(&id).unwrap();
    assert_eq!(balances(&*store), settled);
    assert_eq!(settled, HashMap::from([(0, 200), (1, 400)]));
}

#[test]
fn earlier_queued_transaction_resolves_first() {
    let (store, runner) = bank(2, 100);

    // t1 is queued on both accounts and then dies.
    store.kill_after_writes(3);
    let t1 = TxnId::from("t1");
    assert!(runner.run(&transfer(0, 1, 100), &t1, None).unwrap_err().is_chaos());

    // t2 wants the same 100 from account 0; it can only succeed if it ran first.
    let t2 = TxnId::from("t2");
    assert!(runner.run(&transfer(0, 1, 100), &t2, None).unwrap_err().is_aborted());
    assert_eq!(runner.record(&t1).unwrap().unwrap().state, TxnState::Applied);
    assert_eq!(balances(&*store), HashMap::from([(0, 0), (1, 200)]));
}

#[test]
fn unavailable_store_is_reported_unchanged() {
    let (store, runner) = bank(2, 300);
    store.fail_writes(true);
    let err = runner.run(&transfer(0, 1, 1), &TxnId::from("t1"), None).unwrap_err();
    assert!(matches!(err, TxnError::Store(_)));

    store.fail_writes(false);
    runner.resume_all().unwrap();
    assert_eq!(balances(&*store), HashMap::from([(0, 300), (1, 300)]));
}

#[test]
fn concurrent_transfers_under_chaos_conserve_money() {
    init_tracing();
    const WORKERS: u64 = 4;
    const ACCOUNT_COUNT: i64 = 3;
    const CHANGES: usize = 40;

    let (store, runner) = bank(ACCOUNT_COUNT, 300);
    store.set_chaos(Chaos::new().kill_chance(0.05).seed(11));
    let runner = Arc::new(runner);

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let runner = Arc::clone(&runner);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(worker);
                let mut log = Vec::new();
                for n in 0..CHANGES {
                    let from = rng.gen_range(0..ACCOUNT_COUNT);
                    let to = rng.gen_range(0..ACCOUNT_COUNT);
                    let id = TxnId::from(format!("w{worker}-{n}"));
                    match runner.run(&transfer(from, to, 100), &id, None) {
                        Ok(()) | Err(TxnError::Aborted { .. }) | Err(TxnError::Chaos) => {}
                        Err(err) => panic!("unexpected error: {err}"),
                    }
                    log.push((id, from, to, 100));
                }
                log
            })
        })
        .collect();
    let log: Vec<_> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    store.reset();
    runner.resume_all().unwrap();
    assert!(runner.pending().unwrap().is_empty());

    let finals = balances(&*store);
    assert_eq!(finals.len(), ACCOUNT_COUNT as usize);
    assert!(finals.values().all(|b| *b >= 0));
    assert_eq!(finals.values().sum::<i64>(), ACCOUNT_COUNT * 300);
    assert_eq!(finals, replay(&runner, ACCOUNT_COUNT, 300, &log));
}

#[test]
fn resume_all_runs_alongside_new_transactions() {
    let (store, runner) = bank(4, 300);
    store.set_chaos(Chaos::new().kill_chance(0.1).seed(3));
    for n in 0..20 {
        let _ = runner.run(&transfer(n % 4, (n + 1) % 4, 50), &TxnId::from(format!("a{n}")), None);
    }
    store.reset();

    let runner = Arc::new(runner);
    let resumer = {
        let runner = Arc::clone(&runner);
        thread::spawn(move || runner.resume_all_with_summary().unwrap())
    };
    for n in 0..20 {
        let result = runner.run(&transfer(n % 4, (n + 2) % 4, 50), &TxnId::from(format!("b{n}")), None);
        assert!(result.is_ok() || result.unwrap_err().is_aborted());
    }
    resumer.join().unwrap();
    runner.resume_all().unwrap();

    assert!(runner.pending().unwrap().is_empty());
    assert_eq!(balances(&*store).values().sum::<i64>(), 1200);
    assert_eq!(store.inner().count(ACCOUNTS, &Filter::new()).unwrap(), 4);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn random_transfers_with_kills_conserve_money(
        transfers in prop::collection::vec((0i64..3, 0i64..3, 1i64..200), 1..25),
        seed in any::<u64>(),
    ) {
        let (store, runner) = bank(3, 300);
        store.set_chaos(Chaos::new().kill_chance(0.1).seed(seed));
        let mut log = Vec::new();
        for (n, (from, to, amount)) in transfers.into_iter().enumerate() {
            let id = TxnId::from(format!("t{n}"));
            let result = runner.run(&transfer(from, to, amount), &id, None);
            prop_assert!(!matches!(result, Err(TxnError::Store(_))));
            log.push((id, from, to, amount));
        }
        store.reset();
        runner.resume_all().unwrap();

        let finals = balances(&*store);
        prop_assert_eq!(finals.values().sum::<i64>(), 900);
        prop_assert!(finals.values().all(|b| *b >= 0));
        prop_assert_eq!(finals, replay(&runner, 3, 300, &log));
        prop_assert!(store.get(ACCOUNTS, &DocId::from(3)).unwrap().is_none());
    }
}
