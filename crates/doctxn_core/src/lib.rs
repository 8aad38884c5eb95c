//! # doctxn Core
//!
//! Atomic multi-document transactions on top of a store that only offers
//! atomic single-document conditional writes.
//!
//! A transaction is an ordered list of [`Operation`]s, each asserting a
//! precondition on one document and optionally inserting, changing or
//! removing it. [`Runner::run`] applies the whole list or none of it, and
//! [`Runner::resume`] / [`TransactionRunner::resume_all`] finish transactions whose
//! worker died midway.
//!
//! ## Architecture
//!
//! - [`TransactionRecord`] - durable record of each transaction, kept in
//!   the store itself
//! - Per-document pending queues, embedded in the documents, ordering
//!   conflicting transactions
//! - [`Runner`] - the state machine driving records to a terminal state
//! - [`FakeRunner`] - direct-apply baseline for testing harnesses
//! - [`ChaosStore`] - fault injection wrapper for crash-safety tests
//!
//! ## Example
//!
//! ```rust
//! use doctxn_core::{present, Operation, Runner, TxnError, TxnId};
//! use doctxn_store::{Document, DocumentStore, Filter, InMemoryStore, Mutation};
//!
//! let runner = Runner::with_collection(InMemoryStore::new(), "txns");
//! runner
//!     .store()
//!     .insert_if_absent("accounts", Document::new(0).field("balance", 50))
//!     .unwrap();
//!
//! // Debit 100 from an account holding 50, and open a new account.
//! let ops = [
//!     Operation::new("accounts", 0)
//!         .assert_matches(Filter::new().gte("balance", 100))
//!         .change(Mutation::new().inc("balance", -100)),
//!     Operation::new("accounts", 1)
//!         .assert_missing()
//!         .insert_fields([("balance", 100)]),
//! ];
//! let err = runner.run(&ops, &TxnId::from("t1"), None).unwrap_err();
//! assert!(matches!(err, TxnError::Aborted { .. }));
//! assert_eq!(runner.store().count("accounts", &present()).unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod chaos;
mod config;
mod error;
mod fake;
mod operation;
mod plan;
mod queue;
mod record;
mod runner;
mod types;

pub use chaos::{Chaos, ChaosStore};
pub use config::RunnerConfig;
pub use error::{TxnError, TxnResult};
pub use fake::FakeRunner;
pub use operation::{validate_ops, Action, Assertion, Operation};
pub use plan::{Effect, Plan, PlannedWrite};
pub use queue::{
    is_reserved, is_stub, pending_queue, present, revision, user_fields, MISSING_FIELD, QUEUE_FIELD,
    RESERVED_PREFIX, REV_FIELD,
};
pub use record::TransactionRecord;
pub use runner::{ResumeSummary, Runner, TransactionRunner};
pub use types::{TxnId, TxnState};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
