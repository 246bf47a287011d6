use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::constants::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_MAX_ATTEMPTS, DEFAULT_WORKERS,
    MAX_BACKOFF_SECS,
};
use crate::models::Timeframe;

/// How the planner decides what to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Maximum available history for every unit
    Full,
    /// Only the window after the latest stored candle; fresh units are skipped
    Incremental,
    /// Incremental window, but never skipped
    Forced,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Full => write!(f, "full"),
            SyncMode::Incremental => write!(f, "incremental"),
            SyncMode::Forced => write!(f, "forced"),
        }
    }
}

impl Default for SyncMode {
    fn default() -> Self {
        SyncMode::Incremental
    }
}

/// Requested window. `start = None` asks upstream for everything it has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRange {
    pub start: Option<DateTime<Utc>>,
    pub end: DateTime<Utc>,
}

impl FetchRange {
    /// Widest window upstream serves for `timeframe`
    pub fn full(timeframe: Timeframe, now: DateTime<Utc>) -> Self {
        Self {
            start: timeframe.max_lookback().map(|lookback| now - lookback),
            end: now,
        }
    }

    /// Window starting at the latest stored candle, clamped to the lookback
    pub fn incremental(timeframe: Timeframe, latest: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let start = match timeframe.max_lookback() {
            Some(lookback) => latest.max(now - lookback),
            None => latest,
        };
        Self { start: Some(start), end: now }
    }
}

impl fmt::Display for FetchRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.start {
            Some(start) => write!(f, "{} → {}", start.format("%Y-%m-%d %H:%M"), self.end.format("%Y-%m-%d %H:%M")),
            None => write!(f, "max → {}", self.end.format("%Y-%m-%d %H:%M")),
        }
    }
}

/// Why a unit was planned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// No usable local data, or a full sync was requested
    Full,
    /// Continuing from the latest stored candle
    Incremental,
}

/// One (symbol, timeframe) pair scheduled for a fetch
#[derive(Debug, Clone, PartialEq)]
pub struct FetchUnit {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub range: FetchRange,
    pub kind: FetchKind,
}

/// Retry and backoff parameters shared by both sync engines
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first call
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Add up to `base_delay` of random jitter to every delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            max_delay: Duration::from_secs(MAX_BACKOFF_SECS),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt + 1`, where `attempt` is the 1-based attempt that just failed
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let mut delay = self.base_delay.saturating_mul(1u32 << exponent);
        if self.jitter && !self.base_delay.is_zero() {
            let jitter_ms = rand::random::<f64>() * self.base_delay.as_millis() as f64;
            delay += Duration::from_millis(jitter_ms as u64);
        }
        delay.min(self.max_delay)
    }
}

/// Configuration for one candle sync run
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub timeframes: Vec<Timeframe>,

    pub mode: SyncMode,

    /// Concurrent units in flight
    pub workers: usize,

    /// Restrict the run to these symbols instead of every active instrument
    pub symbols: Option<Vec<String>>,

    pub retry: RetryPolicy,

    /// Per-attempt timeout around a fetch call
    pub fetch_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeframes: Timeframe::default_set(),
            mode: SyncMode::Incremental,
            workers: DEFAULT_WORKERS,
            symbols: None,
            retry: RetryPolicy::default(),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
        }
    }
}

impl SyncConfig {
    pub fn new(timeframes: Vec<Timeframe>, mode: SyncMode, workers: usize) -> Self {
        Self {
            timeframes,
            mode,
            workers: workers.max(1),
            ..Self::default()
        }
    }

    pub fn with_symbols(mut self, symbols: Vec<String>) -> Self {
        self.symbols = Some(symbols);
        self
    }
}

/// Progress snapshot taken when a unit completes
#[derive(Debug, Clone)]
pub struct FetchProgress {
    /// Completed units so far (1-based)
    pub current: usize,

    pub total: usize,

    pub total_elapsed: Duration,

    /// Estimated time remaining
    pub eta: Duration,
}

impl FetchProgress {
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.current as f64 / self.total as f64) * 100.0
        }
    }

    /// Format for display
    pub fn format_display(&self) -> String {
        format!(
            "[{:03}/{:03}] {:.1}% | Elapsed: {:.1}min | ETA: {:.1}min",
            self.current,
            self.total,
            self.percentage(),
            self.total_elapsed.as_secs_f64() / 60.0,
            self.eta.as_secs_f64() / 60.0,
        )
    }
}

/// Completion counter shared by all workers of a run
#[derive(Debug)]
pub struct ProgressTracker {
    total: usize,
    completed: AtomicUsize,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }

    /// Mark one unit complete and return the resulting progress.
    /// ETA is the average time per completed unit times the units left.
    pub fn record(&self) -> FetchProgress {
        let current = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let total_elapsed = self.started.elapsed();
        let remaining = self.total.saturating_sub(current);
        let avg = total_elapsed.as_secs_f64() / current as f64;
        FetchProgress {
            current,
            total: self.total,
            total_elapsed,
            eta: Duration::from_secs_f64(avg * remaining as f64),
        }
    }
}
