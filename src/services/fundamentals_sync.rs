use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use crate::constants::{
    DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_MAX_PERMANENT_FAILURES, DEFAULT_WORKERS, FUNDAMENTALS_STALENESS_HOURS,
};
use crate::error::Result;
use crate::models::{ProgressTracker, RetryPolicy, SyncRun, UnitOutcome, UnitResult};
use crate::services::clock::{Clock, SystemClock};
use crate::services::market_data::FundamentalsFetcher;
use crate::services::{retry, Database, FundamentalsStore, InstrumentRegistry};

/// What to do with symbols upstream keeps rejecting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Try again on every run
    Retry,
    /// Skip the symbol once it has failed permanently `max_failures` times in a row.
    /// A forced run or a later success resets it.
    FlagAndSkip { max_failures: u32 },
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::FlagAndSkip {
            max_failures: DEFAULT_MAX_PERMANENT_FAILURES,
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "retry" => Ok(FailurePolicy::Retry),
            "flag-and-skip" | "flag" => Ok(FailurePolicy::default()),
            other => Err(format!("Unknown failure policy '{}', expected retry or flag-and-skip", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FundamentalsSyncConfig {
    pub symbols: Option<Vec<String>>,
    pub workers: usize,
    /// Snapshots younger than this are skipped unless `force` is set
    pub staleness: chrono::Duration,
    pub force: bool,
    pub failure_policy: FailurePolicy,
    pub retry: RetryPolicy,
    pub fetch_timeout: Duration,
}

impl Default for FundamentalsSyncConfig {
    fn default() -> Self {
        Self {
            symbols: None,
            workers: DEFAULT_WORKERS,
            staleness: chrono::Duration::hours(FUNDAMENTALS_STALENESS_HOURS),
            force: false,
            failure_policy: FailurePolicy::default(),
            retry: RetryPolicy::default(),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FundamentalsPlan {
    pub symbols: Vec<String>,
    pub skipped: Vec<UnitResult>,
}

/// Keeps one fundamentals snapshot per instrument fresh
pub struct FundamentalsSync {
    db: Database,
    store: FundamentalsStore,
    registry: InstrumentRegistry,
    fetcher: Arc<dyn FundamentalsFetcher>,
    clock: Arc<dyn Clock>,
    config: FundamentalsSyncConfig,
}

struct SnapshotContext {
    store: FundamentalsStore,
    fetcher: Arc<dyn FundamentalsFetcher>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    fetch_timeout: Duration,
    progress: ProgressTracker,
}

impl FundamentalsSync {
    pub fn new(db: &Database, fetcher: Arc<dyn FundamentalsFetcher>, config: FundamentalsSyncConfig) -> Self {
        Self {
            db: db.clone(),
            store: FundamentalsStore::new(db.pool().clone()),
            registry: InstrumentRegistry::new(db.pool().clone()),
            fetcher,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn sync(&self) -> Result<SyncRun> {
        self.db.ping().await?;
        let symbols = match &self.config.symbols {
            Some(symbols) => symbols.clone(),
            None => self.registry.active_symbols().await?,
        };
        let plan = self.plan(&symbols).await?;
        Ok(self.run(plan).await)
    }

    pub async fn plan(&self, symbols: &[String]) -> Result<FundamentalsPlan> {
        let now = self.clock.now();
        let mut planned = Vec::new();
        let mut skipped = Vec::new();

        for symbol in symbols {
            if !self.config.force {
                if let FailurePolicy::FlagAndSkip { max_failures } = self.config.failure_policy {
                    let failures = self.store.failure_count(symbol).await?;
                    if failures >= max_failures {
                        skipped.push(
                            UnitResult::skipped(symbol.clone(), None)
                                .with_message(format!("flagged after {} consecutive permanent failures", failures)),
                        );
                        continue;
                    }
                }

                let fresh = self
                    .store
                    .updated_at(symbol)
                    .await?
                    .map(|at| now - at < self.config.staleness)
                    .unwrap_or(false);
                if fresh {
                    skipped.push(UnitResult::skipped(symbol.clone(), None));
                    continue;
                }
            }
            planned.push(symbol.clone());
        }

        info!(
            units = planned.len(),
            skipped = skipped.len(),
            force = self.config.force,
            "Planned fundamentals sync"
        );
        Ok(FundamentalsPlan {
            symbols: planned,
            skipped,
        })
    }

    pub async fn run(&self, plan: FundamentalsPlan) -> SyncRun {
        let started_at = self.clock.now();
        let timer = Instant::now();
        let workers = self.config.workers.max(1);

        let ctx = Arc::new(SnapshotContext {
            store: self.store.clone(),
            fetcher: Arc::clone(&self.fetcher),
            clock: Arc::clone(&self.clock),
            retry: self.config.retry.clone(),
            fetch_timeout: self.config.fetch_timeout,
            progress: ProgressTracker::new(plan.symbols.len()),
        });

        let fetched: Vec<UnitResult> = stream::iter(plan.symbols)
            .map(|symbol| {
                let ctx = Arc::clone(&ctx);
                async move {
                    let task_symbol = symbol.clone();
                    match tokio::spawn(async move { ctx.refresh(task_symbol).await }).await {
                        Ok(result) => result,
                        Err(e) => {
                            error!(symbol = %symbol, error = %e, "Worker task aborted");
                            UnitResult::failed(symbol, None, 0, format!("worker task aborted: {}", e))
                        }
                    }
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        let mut results = plan.skipped;
        results.extend(fetched);
        let run = SyncRun {
            started_at,
            finished_at: self.clock.now(),
            duration: timer.elapsed(),
            results,
        };
        info!(
            total = run.total(),
            succeeded = run.succeeded(),
            skipped = run.skipped(),
            flagged = run.flagged().len(),
            failed = run.failed(),
            "Fundamentals sync finished"
        );
        run
    }
}

impl SnapshotContext {
    async fn refresh(&self, symbol: String) -> UnitResult {
        let started = Instant::now();
        let fetcher = self.fetcher.as_ref();
        let sym = symbol.as_str();
        let (fetched, attempts) = retry::with_backoff(&self.retry, self.fetch_timeout, sym, move || {
            fetcher.fetch_fundamentals(sym)
        })
        .await;

        let now = self.clock.now();
        let result = match fetched {
            Ok(mut snapshot) => {
                snapshot.symbol = symbol.clone();
                snapshot.updated_at = now;
                let populated = snapshot.metrics.populated();
                match self.store.upsert(&snapshot).await {
                    Ok(()) => {
                        if let Err(e) = self.store.clear_failures(&symbol).await {
                            warn!(symbol = %symbol, error = %e, "Failed to reset failure counter");
                        }
                        UnitResult::succeeded(symbol.clone(), None, 1, 0, attempts)
                            .with_message(format!("{} metrics", populated))
                    }
                    Err(e) => UnitResult::failed(symbol.clone(), None, attempts, format!("store: {}", e)),
                }
            }
            Err(e) => {
                if !e.is_transient() {
                    match self.store.record_failure(&symbol, &e.to_string(), now).await {
                        Ok(count) => warn!(symbol = %symbol, consecutive = count, error = %e, "Permanent fundamentals failure"),
                        Err(store_err) => warn!(symbol = %symbol, error = %store_err, "Failed to record fundamentals failure"),
                    }
                }
                UnitResult::failed(symbol.clone(), None, attempts, e.to_string())
            }
        }
        .with_elapsed(started.elapsed());

        let progress = self.progress.record();
        info!(
            symbol = %symbol,
            outcome = %result.outcome,
            attempts = result.attempts,
            "{}",
            progress.format_display()
        );
        if result.outcome == UnitOutcome::Failed {
            warn!(symbol = %symbol, error = result.message.as_deref().unwrap_or_default(), "Fundamentals unit failed");
        }
        result
    }
}
