use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands;
use crate::commands::sync::SyncArgs;
use crate::constants::{DEFAULT_MAX_PERMANENT_FAILURES, DEFAULT_WORKERS};
use crate::services::FailurePolicy;
use crate::utils::parse_symbol_list;

#[derive(Parser)]
#[command(name = "ztrader")]
#[command(about = "Multi-timeframe NSE market data sync", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load the instrument universe into the registry
    Seed {
        /// Instrument list (JSON); defaults to INSTRUMENTS_FILE
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Fetch candles for the requested timeframes
    Sync {
        /// Timeframes: all, default, or comma-separated (e.g., 1d,1h,75m)
        #[arg(short, long, default_value = "default")]
        timeframe: String,

        /// Fetch the full available history
        #[arg(long, conflicts_with = "update")]
        full: bool,

        /// Incremental update (default)
        #[arg(long)]
        update: bool,

        /// Ignore the up-to-date check
        #[arg(long)]
        force: bool,

        /// Concurrent units in flight
        #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
        workers: usize,

        /// Restrict to these symbols (comma-separated)
        #[arg(short, long)]
        symbols: Option<String>,

        /// Report freshness per unit without fetching
        #[arg(long)]
        status: bool,

        /// Send the summary to Telegram when a unit fails
        #[arg(long)]
        notify: bool,
    },
    /// Show per-unit freshness of the candle store
    Status {
        #[arg(short, long, default_value = "default")]
        timeframe: String,

        #[arg(short, long)]
        symbols: Option<String>,
    },
    /// Refresh fundamentals snapshots
    Fundamentals {
        /// Refresh even fresh or flagged symbols
        #[arg(long)]
        force: bool,

        #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
        workers: usize,

        #[arg(short, long)]
        symbols: Option<String>,

        /// retry | flag-and-skip
        #[arg(long, default_value = "flag-and-skip")]
        failure_policy: FailurePolicy,

        /// Consecutive permanent failures before a symbol is skipped
        #[arg(long, default_value_t = DEFAULT_MAX_PERMANENT_FAILURES)]
        max_failures: u32,
    },
    /// Print stored candles
    Candles {
        #[arg(long)]
        symbol: String,

        #[arg(short, long, default_value = "1d")]
        timeframe: String,

        #[arg(short, long)]
        limit: Option<u32>,

        /// First local date, YYYY-MM-DD
        #[arg(long)]
        start: Option<String>,

        /// Last local date, YYYY-MM-DD
        #[arg(long)]
        end: Option<String>,
    },
    /// Run incremental syncs continuously
    Watch {
        #[arg(short, long, default_value = "default")]
        timeframe: String,

        #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
        workers: usize,
    },
}

pub fn run() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Seed { file } => {
            commands::seed::run(file);
        }
        Commands::Sync {
            timeframe,
            full,
            update: _,
            force,
            workers,
            symbols,
            status,
            notify,
        } => {
            commands::sync::run(SyncArgs {
                timeframes: timeframe,
                full,
                force,
                workers,
                symbols: symbols.as_deref().map(parse_symbol_list),
                status_only: status,
                notify,
            });
        }
        Commands::Status { timeframe, symbols } => {
            commands::status::run(&timeframe, symbols.as_deref().map(parse_symbol_list));
        }
        Commands::Fundamentals {
            force,
            workers,
            symbols,
            failure_policy,
            max_failures,
        } => {
            let failure_policy = match failure_policy {
                FailurePolicy::FlagAndSkip { .. } => FailurePolicy::FlagAndSkip { max_failures },
                FailurePolicy::Retry => FailurePolicy::Retry,
            };
            commands::fundamentals::run(force, workers, symbols.as_deref().map(parse_symbol_list), failure_policy);
        }
        Commands::Candles {
            symbol,
            timeframe,
            limit,
            start,
            end,
        } => {
            commands::candles::run(symbol, &timeframe, limit, start, end);
        }
        Commands::Watch { timeframe, workers } => {
            commands::watch::run(&timeframe, workers);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_flags_parse() {
        let cli = Cli::try_parse_from([
            "ztrader", "sync", "--timeframe", "1d,1h", "--force", "--workers", "8", "--symbols", "tcs.ns,INFY.NS",
        ])
        .unwrap();
        match cli.command {
            Commands::Sync {
                timeframe,
                force,
                workers,
                symbols,
                full,
                ..
            } => {
                assert_eq!(timeframe, "1d,1h");
                assert!(force);
                assert!(!full);
                assert_eq!(workers, 8);
                assert_eq!(parse_symbol_list(&symbols.unwrap()), vec!["TCS.NS", "INFY.NS"]);
            }
            _ => panic!("expected sync"),
        }
    }

    #[test]
    fn test_full_conflicts_with_update() {
        assert!(Cli::try_parse_from(["ztrader", "sync", "--full", "--update"]).is_err());
    }

    #[test]
    fn test_fundamentals_policy_flag() {
        let cli = Cli::try_parse_from(["ztrader", "fundamentals", "--failure-policy", "retry"]).unwrap();
        match cli.command {
            Commands::Fundamentals { failure_policy, max_failures, .. } => {
                assert_eq!(failure_policy, FailurePolicy::Retry);
                assert_eq!(max_failures, 3);
            }
            _ => panic!("expected fundamentals"),
        }
        assert!(Cli::try_parse_from(["ztrader", "fundamentals", "--failure-policy", "sometimes"]).is_err());
    }
}
