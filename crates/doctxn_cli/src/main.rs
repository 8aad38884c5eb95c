//! doctxn CLI
//!
//! Command-line tools for exercising the transaction runner.
//!
//! # Commands
//!
//! - `simulate` - Run the bank account simulation under fault injection
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use commands::simulate::{Format, ModeArg, SimulateOptions};
use tracing_subscriber::EnvFilter;

/// doctxn command-line tools.
#[derive(Parser)]
#[command(name = "doctxn")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bank account simulation and check its invariants
    Simulate {
        /// Number of concurrent workers
        #[arg(short, long, default_value = "1")]
        workers: usize,

        /// Number of accounts
        #[arg(short, long, default_value = "4")]
        accounts: i64,

        /// Changes per worker (overrides --duration-ms)
        #[arg(short, long, default_value = "0")]
        changes: usize,

        /// Run length in milliseconds when --changes is 0
        #[arg(long, default_value = "1000")]
        duration_ms: u64,

        /// Probability of killing a worker around each write
        #[arg(long, default_value = "0.0")]
        kill_chance: f64,

        /// Probability of delaying each write
        #[arg(long, default_value = "0.0")]
        slowdown_chance: f64,

        /// Delay length in milliseconds
        #[arg(long, default_value = "0")]
        slowdown_ms: u64,

        /// Transaction shape
        #[arg(short, long, value_enum, default_value = "transfer")]
        mode: ModeArg,

        /// Use the non-transactional runner
        #[arg(long)]
        fake: bool,

        /// Seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate {
            workers,
            accounts,
            changes,
            duration_ms,
            kill_chance,
            slowdown_chance,
            slowdown_ms,
            mode,
            fake,
            seed,
            format,
        } => {
            commands::simulate::run(&SimulateOptions {
                workers,
                accounts,
                changes,
                duration_ms,
                kill_chance,
                slowdown_chance,
                slowdown_ms,
                mode,
                fake,
                seed,
                format,
            })?;
        }
        Commands::Version => {
            println!("doctxn CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("doctxn Core v{}", doctxn_core::VERSION);
        }
    }

    Ok(())
}
