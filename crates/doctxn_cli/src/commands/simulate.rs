//! Simulate command implementation.

use clap::ValueEnum;
use doctxn_testkit::simulation::{simulate, Mode, SimError, SimParams, SimReport};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Errors from the simulate command.
#[derive(Debug, Error)]
pub enum SimulateError {
    /// A flag value is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The simulation failed or found an inconsistency.
    #[error(transparent)]
    Simulation(#[from] SimError),

    /// The report could not be encoded.
    #[error("failed to encode report: {0}")]
    Json(#[from] serde_json::Error),
}

/// Transaction shape, as given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Move 100 between existing accounts.
    Transfer,
    /// Move a whole account to a new id.
    ReinsertCopy,
    /// Open an empty account, close the origin, credit the new one.
    ReinsertZeroed,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Transfer => Mode::Transfer,
            ModeArg::ReinsertCopy => Mode::ReinsertCopy,
            ModeArg::ReinsertZeroed => Mode::ReinsertZeroed,
        }
    }
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human readable summary.
    Text,
    /// The full report as JSON.
    Json,
}

/// Options of the simulate command.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Concurrent workers.
    pub workers: usize,
    /// Accounts seeded before the run.
    pub accounts: i64,
    /// Changes per worker, `0` to run for `duration_ms`.
    pub changes: usize,
    /// Run length in milliseconds when `changes` is `0`.
    pub duration_ms: u64,
    /// Kill probability per write.
    pub kill_chance: f64,
    /// Slowdown probability per write.
    pub slowdown_chance: f64,
    /// Slowdown length in milliseconds.
    pub slowdown_ms: u64,
    /// Transaction shape.
    pub mode: ModeArg,
    /// Use the non-transactional runner.
    pub fake: bool,
    /// Seed for reproducible runs.
    pub seed: Option<u64>,
    /// Output format.
    pub format: Format,
}

impl SimulateOptions {
    fn params(&self) -> Result<SimParams, SimulateError> {
        if self.workers == 0 {
            return Err(SimulateError::InvalidArgument("--workers must be at least 1".into()));
        }
        if self.accounts < 2 {
            return Err(SimulateError::InvalidArgument("--accounts must be at least 2".into()));
        }
        for (flag, chance) in [
            ("--kill-chance", self.kill_chance),
            ("--slowdown-chance", self.slowdown_chance),
        ] {
            if !(0.0..=1.0).contains(&chance) {
                return Err(SimulateError::InvalidArgument(format!(
                    "{flag} must be between 0 and 1, got {chance}"
                )));
            }
        }

        let params = SimParams::new()
            .workers(self.workers)
            .accounts(self.accounts)
            .changes(self.changes)
            .duration(Duration::from_millis(self.duration_ms))
            .mode(self.mode.into())
            .unsafe_fake(self.fake)
            .chaos(
                self.kill_chance,
                self.slowdown_chance,
                Duration::from_millis(self.slowdown_ms),
            );
        Ok(match self.seed {
            Some(seed) => params.seed(seed),
            None => params,
        })
    }
}

#[derive(Debug, Serialize)]
struct Output<'a> {
    workers: usize,
    accounts: i64,
    seed: Option<u64>,
    report: &'a SimReport,
}

/// Runs the simulate command.
pub fn run(options: &SimulateOptions) -> Result<(), SimulateError> {
    let params = options.params()?;
    info!(
        workers = params.workers,
        accounts = params.accounts,
        mode = %params.mode,
        fake = params.unsafe_fake,
        "starting simulation"
    );
    let report = simulate(&params)?;

    match options.format {
        Format::Json => {
            let output = Output {
                workers: params.workers,
                accounts: params.accounts,
                seed: params.seed,
                report: &report,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Format::Text => print_text_output(&params, &report),
    }
    Ok(())
}

fn print_text_output(params: &SimParams, report: &SimReport) {
    println!("Simulation");
    println!("==========");
    println!("Mode:       {}{}", report.mode, if report.fake { " (fake)" } else { "" });
    println!("Workers:    {}", params.workers);
    println!("Accounts:   {}", params.accounts);
    println!();
    println!("{report}");
    println!();
    println!("Final balances:");
    for (id, balance) in &report.final_balances {
        println!("  {id:>4}: {balance}");
    }
    let total: i64 = report.final_balances.values().sum();
    println!("  total: {total}");
}
