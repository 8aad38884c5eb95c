//! Bank account fixtures.
//!
//! Accounts are documents `{_id: i, balance: N}` in the [`ACCOUNTS`]
//! collection, the workload the simulation is built around.

use doctxn_core::{present, Operation, Runner, RunnerConfig};
use doctxn_store::{DocId, Document, DocumentStore, Filter, InMemoryStore, Mutation, StoreResult};
use std::collections::BTreeMap;

/// Collection holding the accounts.
pub const ACCOUNTS: &str = "accounts";

/// Balance every account starts with.
pub const INITIAL_BALANCE: i64 = 300;

/// Collection holding transaction records in fixtures.
pub const TXN_COLLECTION: &str = "tc";

/// Inserts accounts `0..count`, each holding `balance`.
///
/// # Errors
///
/// Returns an error if the store fails.
pub fn seed_accounts<S: DocumentStore + ?Sized>(
    store: &S,
    count: i64,
    balance: i64,
) -> StoreResult<()> {
    for i in 0..count {
        store.insert_if_absent(ACCOUNTS, Document::new(i).field("balance", balance))?;
    }
    Ok(())
}

/// Returns the balance of every account that logically exists.
///
/// # Errors
///
/// Returns an error if the store fails.
pub fn account_balances<S: DocumentStore + ?Sized>(store: &S) -> StoreResult<BTreeMap<i64, i64>> {
    Ok(store
        .find(ACCOUNTS, &present())?
        .into_iter()
        .filter_map(|doc| Some((doc.id.as_int()?, doc.get_integer("balance").unwrap_or(0))))
        .collect())
}

/// Reads one account's balance, `None` if it does not logically exist.
///
/// # Errors
///
/// Returns an error if the store fails.
pub fn account_balance<S: DocumentStore + ?Sized>(store: &S, id: i64) -> StoreResult<Option<i64>> {
    Ok(store
        .get(ACCOUNTS, &DocId::from(id))?
        .as_ref()
        .and_then(doctxn_core::user_fields)
        .and_then(|fields| fields.get("balance").and_then(|v| v.as_integer())))
}

/// Creates a runner over a fresh in-memory store seeded with accounts.
///
/// # Errors
///
/// Returns an error if seeding the store fails.
pub fn bank(count: i64) -> StoreResult<Runner<InMemoryStore>> {
    let store = InMemoryStore::new();
    seed_accounts(&store, count, INITIAL_BALANCE)?;
    Ok(Runner::new(store, RunnerConfig::new().collection(TXN_COLLECTION)))
}

/// Moves `amount` between two existing accounts if the origin can afford it.
pub fn transfer_ops(origin: i64, target: i64, amount: i64) -> Vec<Operation> {
    vec![
        Operation::new(ACCOUNTS, origin)
            .assert_matches(Filter::new().gte("balance", amount))
            .change(Mutation::new().inc("balance", -amount)),
        Operation::new(ACCOUNTS, target)
            .assert_exists()
            .change(Mutation::new().inc("balance", amount)),
    ]
}

/// Moves a whole account holding exactly `amount` to a new, missing id.
pub fn reinsert_copy_ops(origin: i64, target: i64, amount: i64) -> Vec<Operation> {
    vec![
        Operation::new(ACCOUNTS, origin)
            .assert_matches(Filter::new().eq("balance", amount))
            .remove(),
        Operation::new(ACCOUNTS, target)
            .assert_missing()
            .insert_fields([("balance", amount)]),
    ]
}

/// Opens an empty account, closes the origin, then credits the new one.
pub fn reinsert_zeroed_ops(origin: i64, target: i64, amount: i64) -> Vec<Operation> {
    vec![
        Operation::new(ACCOUNTS, target)
            .assert_missing()
            .insert_fields([("balance", 0)]),
        Operation::new(ACCOUNTS, origin)
            .assert_matches(Filter::new().eq("balance", amount))
            .remove(),
        Operation::new(ACCOUNTS, target)
            .assert_exists()
            .change(Mutation::new().inc("balance", amount)),
    ]
}
