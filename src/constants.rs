//! Tuning defaults shared by the sync engines, the fetcher and the CLI.
//!
//! Every value here can be overridden either through `AppConfig` (environment)
//! or through command line flags.

/// Default number of concurrent fetch units
pub const DEFAULT_WORKERS: usize = 5;

/// Attempts per unit, counting the first call
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// First backoff delay; doubles on every subsequent attempt
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;

/// Upper bound for a single backoff delay
pub const MAX_BACKOFF_SECS: u64 = 30;

/// Per-attempt timeout for a fetch call
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Minimum spacing between two upstream calls across all workers
pub const DEFAULT_MIN_REQUEST_INTERVAL_MS: u64 = 500;

/// Fundamentals snapshots younger than this are not refetched
pub const FUNDAMENTALS_STALENESS_HOURS: i64 = 24;

/// Consecutive permanent failures before a symbol is flagged under `FlagAndSkip`
pub const DEFAULT_MAX_PERMANENT_FAILURES: u32 = 3;

/// Schema version stored in the metadata table
pub const DB_SCHEMA_VERSION: &str = "1";

/// Market defaults (NSE)
pub mod market {
    pub const TIMEZONE: &str = "Asia/Kolkata";
    pub const SESSION_OPEN: &str = "09:15";
    pub const SESSION_CLOSE: &str = "15:30";
}

/// Watch loop pacing
pub mod watch {
    /// Sleep between passes while the session is open
    pub const SESSION_INTERVAL_SECS: u64 = 300;
    /// Sleep between passes outside the session
    pub const IDLE_INTERVAL_SECS: u64 = 1_800;
}
