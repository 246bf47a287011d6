use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

use crate::models::Timeframe;
use crate::utils::{format_duration, format_number};

/// Terminal state of one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    Succeeded,
    /// Local data already fresh, or the symbol is flagged
    Skipped,
    Failed,
}

impl fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitOutcome::Succeeded => write!(f, "succeeded"),
            UnitOutcome::Skipped => write!(f, "skipped"),
            UnitOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Result of one unit. Fundamentals units carry no timeframe.
#[derive(Debug, Clone)]
pub struct UnitResult {
    pub symbol: String,
    pub timeframe: Option<Timeframe>,
    pub outcome: UnitOutcome,
    /// Rows newly written
    pub inserted: usize,
    /// Rows already present
    pub duplicates: usize,
    /// Rows dropped by validation
    pub rejected: usize,
    pub attempts: u32,
    /// Last error for failures, reason for flagged skips
    pub message: Option<String>,
    pub elapsed: Duration,
}

impl UnitResult {
    fn base(symbol: impl Into<String>, timeframe: Option<Timeframe>, outcome: UnitOutcome) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            outcome,
            inserted: 0,
            duplicates: 0,
            rejected: 0,
            attempts: 0,
            message: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn succeeded(
        symbol: impl Into<String>,
        timeframe: Option<Timeframe>,
        inserted: usize,
        duplicates: usize,
        attempts: u32,
    ) -> Self {
        Self {
            inserted,
            duplicates,
            attempts,
            ..Self::base(symbol, timeframe, UnitOutcome::Succeeded)
        }
    }

    pub fn skipped(symbol: impl Into<String>, timeframe: Option<Timeframe>) -> Self {
        Self::base(symbol, timeframe, UnitOutcome::Skipped)
    }

    pub fn failed(
        symbol: impl Into<String>,
        timeframe: Option<Timeframe>,
        attempts: u32,
        error: impl Into<String>,
    ) -> Self {
        Self {
            attempts,
            message: Some(error.into()),
            ..Self::base(symbol, timeframe, UnitOutcome::Failed)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_rejected(mut self, rejected: usize) -> Self {
        self.rejected = rejected;
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// "RELIANCE.NS 1d" or "RELIANCE.NS"
    pub fn label(&self) -> String {
        match self.timeframe {
            Some(tf) => format!("{} {}", self.symbol, tf),
            None => self.symbol.clone(),
        }
    }
}

/// Aggregate of one sync run. Lives only in memory.
#[derive(Debug, Clone)]
pub struct SyncRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
    pub results: Vec<UnitResult>,
}

impl SyncRun {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    fn count(&self, outcome: UnitOutcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(UnitOutcome::Succeeded)
    }

    pub fn skipped(&self) -> usize {
        self.count(UnitOutcome::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(UnitOutcome::Failed)
    }

    pub fn total_inserted(&self) -> usize {
        self.results.iter().map(|r| r.inserted).sum()
    }

    pub fn total_duplicates(&self) -> usize {
        self.results.iter().map(|r| r.duplicates).sum()
    }

    pub fn total_rejected(&self) -> usize {
        self.results.iter().map(|r| r.rejected).sum()
    }

    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| r.outcome == UnitOutcome::Failed)
    }

    /// Failed units sorted by symbol then timeframe
    pub fn failures(&self) -> Vec<&UnitResult> {
        let mut failed: Vec<&UnitResult> = self
            .results
            .iter()
            .filter(|r| r.outcome == UnitOutcome::Failed)
            .collect();
        failed.sort_by(|a, b| a.symbol.cmp(&b.symbol).then(a.timeframe.cmp(&b.timeframe)));
        failed
    }

    /// Distinct failed symbols, for a `--symbols` re-run
    pub fn failed_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.failures().iter().map(|r| r.symbol.clone()).collect();
        symbols.dedup();
        symbols
    }

    /// Skips that carry a reason: units held back after repeated permanent
    /// failures, as opposed to units that were simply up to date
    pub fn flagged(&self) -> Vec<&UnitResult> {
        let mut flagged: Vec<&UnitResult> = self
            .results
            .iter()
            .filter(|r| r.outcome == UnitOutcome::Skipped && r.message.is_some())
            .collect();
        flagged.sort_by(|a, b| a.symbol.cmp(&b.symbol).then(a.timeframe.cmp(&b.timeframe)));
        flagged
    }

    /// Multi-line summary used by the CLI and notifications
    pub fn format_summary(&self) -> String {
        let flagged = self.flagged();
        let skipped = match flagged.len() {
            0 => self.skipped().to_string(),
            n => format!("{} ({} flagged)", self.skipped(), n),
        };
        let mut out = format!(
            "Total: {} | Succeeded: {} | Skipped: {} | Failed: {}\nInserted: {} | Duplicates: {} | Rejected: {} | Duration: {}",
            self.total(),
            self.succeeded(),
            skipped,
            self.failed(),
            format_number(self.total_inserted()),
            format_number(self.total_duplicates()),
            format_number(self.total_rejected()),
            format_duration(self.duration),
        );
        for failure in self.failures() {
            out.push_str(&format!(
                "\n  ✗ {}: {}",
                failure.label(),
                failure.message.as_deref().unwrap_or("unknown error")
            ));
        }
        for unit in flagged {
            out.push_str(&format!("\n  ⚑ {}: {}", unit.label(), unit.message.as_deref().unwrap_or_default()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_with(results: Vec<UnitResult>) -> SyncRun {
        let now = Utc::now();
        SyncRun {
            started_at: now,
            finished_at: now,
            duration: Duration::from_secs(3),
            results,
        }
    }

    #[test]
    fn test_counts_by_outcome() {
        let run = run_with(vec![
            UnitResult::succeeded("TCS.NS", Some(Timeframe::Day1), 250, 1, 1),
            UnitResult::succeeded("INFY.NS", Some(Timeframe::Day1), 240, 0, 2),
            UnitResult::skipped("ITC.NS", Some(Timeframe::Day1)),
            UnitResult::failed("BAD.NS", Some(Timeframe::Day1), 1, "not found"),
        ]);
        assert_eq!(run.total(), 4);
        assert_eq!(run.succeeded(), 2);
        assert_eq!(run.skipped(), 1);
        assert_eq!(run.failed(), 1);
        assert_eq!(run.total_inserted(), 490);
        assert_eq!(run.total_duplicates(), 1);
        assert!(run.has_failures());
    }

    #[test]
    fn test_failed_symbols_are_sorted_and_unique() {
        let run = run_with(vec![
            UnitResult::failed("ZEE.NS", Some(Timeframe::Hour1), 3, "timeout"),
            UnitResult::failed("ACC.NS", Some(Timeframe::Day1), 3, "timeout"),
            UnitResult::failed("ACC.NS", Some(Timeframe::Hour1), 3, "timeout"),
        ]);
        assert_eq!(run.failed_symbols(), vec!["ACC.NS", "ZEE.NS"]);
        assert_eq!(run.failures()[0].label(), "ACC.NS 1h");
    }

    #[test]
    fn test_summary_lists_failures() {
        let run = run_with(vec![UnitResult::failed("BAD.NS", None, 1, "symbol not found")]);
        let summary = run.format_summary();
        assert!(summary.contains("Failed: 1"));
        assert!(summary.contains("BAD.NS: symbol not found"));
    }

    #[test]
    fn test_summary_separates_flagged_from_fresh_skips() {
        let run = run_with(vec![
            UnitResult::succeeded("TCS.NS", None, 1, 0, 1).with_message("27 metrics"),
            UnitResult::skipped("ITC.NS", None),
            UnitResult::skipped("GONE.NS", None).with_message("flagged after 3 consecutive permanent failures"),
        ]);
        assert_eq!(run.skipped(), 2);
        assert_eq!(run.flagged().len(), 1);
        assert_eq!(run.flagged()[0].symbol, "GONE.NS");

        let summary = run.format_summary();
        assert!(summary.contains("Skipped: 2 (1 flagged)"));
        assert!(summary.contains("⚑ GONE.NS: flagged after 3 consecutive permanent failures"));
        assert!(!summary.contains("ITC.NS"));
        assert!(!summary.contains("27 metrics"));
    }
}
