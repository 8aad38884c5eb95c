//! Property-based test generators using proptest.
//!
//! Strategies stay within a small id space so that generated transactions
//! collide on the same accounts often.

use crate::fixtures::{transfer_ops, ACCOUNTS};
use crate::simulation::Mode;
use doctxn_core::Operation;
use doctxn_store::{Filter, Mutation};
use proptest::prelude::*;

/// Ids drawn by the strategies, `0..ACCOUNT_SPACE`.
pub const ACCOUNT_SPACE: i64 = 4;

/// Strategy for an account id, possibly one that does not exist yet.
pub fn account_id_strategy() -> impl Strategy<Value = i64> {
    0..ACCOUNT_SPACE
}

/// Strategy for `(origin, target, amount)` transfers.
pub fn transfer_strategy() -> impl Strategy<Value = (i64, i64, i64)> {
    (account_id_strategy(), account_id_strategy(), 1i64..400)
}

/// Strategy for a batch of transfer transactions.
pub fn transfer_batch_strategy(
    min: usize,
    max: usize,
) -> impl Strategy<Value = Vec<Vec<Operation>>> {
    prop::collection::vec(
        transfer_strategy().prop_map(|(origin, target, amount)| transfer_ops(origin, target, amount)),
        min..max,
    )
}

/// Strategy for a single operation on an account.
///
/// Covers every assertion kind and every action kind.
pub fn operation_strategy() -> impl Strategy<Value = Operation> {
    (account_id_strategy(), 0u8..4, 0i64..400, 0u8..4, -200i64..200).prop_map(
        |(id, assertion, threshold, action, delta)| {
            let op = Operation::new(ACCOUNTS, id);
            let op = match assertion {
                0 => op,
                1 => op.assert_exists(),
                2 => op.assert_missing(),
                _ => op.assert_matches(Filter::new().gte("balance", threshold)),
            };
            match action {
                0 => op,
                1 => op.insert_fields([("balance", threshold)]),
                2 => op.change(Mutation::new().inc("balance", delta)),
                _ => op.remove(),
            }
        },
    )
}

/// Strategy for an operation list. Lists may be invalid, e.g. insert the
/// same document twice.
pub fn operation_list_strategy(max_ops: usize) -> impl Strategy<Value = Vec<Operation>> {
    prop::collection::vec(operation_strategy(), 1..max_ops.max(2))
}

/// Strategy for a simulation mode.
pub fn mode_strategy() -> impl Strategy<Value = Mode> {
    prop_oneof![
        2 => Just(Mode::Transfer),
        1 => Just(Mode::ReinsertCopy),
        1 => Just(Mode::ReinsertZeroed),
    ]
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
