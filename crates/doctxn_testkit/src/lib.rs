//! # doctxn Testkit
//!
//! Test utilities for doctxn.
//!
//! This crate provides:
//! - Bank account fixtures and canned transactions
//! - Property-based test generators using proptest
//! - The concurrent bank simulation used to check crash safety
//!
//! ## Usage
//!
//! ```rust
//! use doctxn_testkit::prelude::*;
//! use doctxn_core::TxnId;
//!
//! let runner = bank(2).unwrap();
//! runner.run(&transfer_ops(0, 1, 100), &TxnId::from("t1"), None).unwrap();
//! assert_eq!(account_balance(runner.store(), 1).unwrap(), Some(400));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod simulation;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::simulation::*;
}

pub use fixtures::*;
pub use generators::*;
pub use simulation::{simulate, BalanceChange, Mode, SimError, SimParams, SimReport, SimResult};
