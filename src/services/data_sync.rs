use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::models::{
    Candle, FetchKind, FetchRange, FetchUnit, ProgressTracker, RetryPolicy, SyncConfig, SyncMode, SyncRun, Timeframe,
    UnitOutcome, UnitResult,
};
use crate::services::candle_store::{CandleQuery, CandleStore};
use crate::services::clock::{Clock, SystemClock};
use crate::services::market_data::MarketDataFetcher;
use crate::services::resampler::Resampler;
use crate::services::status_report::{StatusReporter, UnitStatus};
use crate::services::{retry, Database, InstrumentRegistry, MarketCalendar};

/// Units to fetch and units already up to date, as decided at planning time
#[derive(Debug, Clone)]
pub struct SyncPlan {
    pub mode: SyncMode,
    pub reference_date: NaiveDate,
    pub units: Vec<FetchUnit>,
    pub skipped: Vec<UnitResult>,
}

/// Candle sync orchestrator: plans units, runs them through a bounded worker
/// pool and folds the outcomes into a `SyncRun`.
pub struct DataSync {
    db: Database,
    store: CandleStore,
    registry: InstrumentRegistry,
    fetcher: Arc<dyn MarketDataFetcher>,
    calendar: MarketCalendar,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
}

/// Everything a worker task needs, shared by `Arc`
struct UnitContext {
    store: CandleStore,
    fetcher: Arc<dyn MarketDataFetcher>,
    calendar: MarketCalendar,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    fetch_timeout: std::time::Duration,
    progress: ProgressTracker,
}

impl DataSync {
    pub fn new(db: &Database, fetcher: Arc<dyn MarketDataFetcher>, config: SyncConfig) -> Self {
        Self {
            db: db.clone(),
            store: CandleStore::new(db.pool().clone()),
            registry: InstrumentRegistry::new(db.pool().clone()),
            fetcher,
            calendar: MarketCalendar::default(),
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_calendar(mut self, calendar: MarketCalendar) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn calendar(&self) -> &MarketCalendar {
        &self.calendar
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Connectivity check, symbol resolution, plan and run with the configured mode
    pub async fn sync(&self) -> Result<SyncRun> {
        self.db.ping().await?;
        let symbols = self.resolve_symbols().await?;
        if symbols.is_empty() {
            warn!("No active instruments to sync, run `seed` first");
        }
        let plan = self.plan(&symbols, &self.config.timeframes, self.config.mode).await?;
        Ok(self.run(plan).await)
    }

    /// Configured symbols, or every active instrument
    pub async fn resolve_symbols(&self) -> Result<Vec<String>> {
        match &self.config.symbols {
            Some(symbols) => {
                for symbol in symbols {
                    if self.registry.get(symbol).await?.is_none() {
                        warn!(symbol = %symbol, "Symbol is not in the instrument registry");
                    }
                }
                Ok(symbols.clone())
            }
            None => self.registry.active_symbols().await,
        }
    }

    /// Decide which units need a fetch and over which window
    pub async fn plan(&self, symbols: &[String], timeframes: &[Timeframe], mode: SyncMode) -> Result<SyncPlan> {
        let now = self.clock.now();
        let reference_date = self.calendar.reference_date(now);
        let mut units = Vec::new();
        let mut skipped = Vec::new();

        for &timeframe in timeframes {
            for symbol in symbols {
                let latest = match mode {
                    SyncMode::Full => None,
                    SyncMode::Incremental | SyncMode::Forced => self.store.latest_timestamp(symbol, timeframe).await?,
                };

                match latest {
                    None => units.push(FetchUnit {
                        symbol: symbol.clone(),
                        timeframe,
                        range: FetchRange::full(timeframe, now),
                        kind: FetchKind::Full,
                    }),
                    Some(latest)
                        if mode == SyncMode::Incremental && self.calendar.is_unit_up_to_date(latest, timeframe, now) =>
                    {
                        debug!(symbol = %symbol, timeframe = %timeframe, latest = %latest, "Up to date, skipping");
                        skipped.push(UnitResult::skipped(symbol.clone(), Some(timeframe)));
                    }
                    Some(latest) => units.push(FetchUnit {
                        symbol: symbol.clone(),
                        timeframe,
                        range: FetchRange::incremental(timeframe, latest, now),
                        kind: FetchKind::Incremental,
                    }),
                }
            }
        }

        info!(
            mode = %mode,
            reference_date = %reference_date,
            units = units.len(),
            skipped = skipped.len(),
            "Planned sync"
        );
        Ok(SyncPlan {
            mode,
            reference_date,
            units,
            skipped,
        })
    }

    /// Execute a plan. Never fails: every unit error becomes a failed outcome.
    ///
    /// Derived timeframes run after every upstream unit has finished, so they
    /// are built from the freshest source candles.
    pub async fn run(&self, plan: SyncPlan) -> SyncRun {
        let started_at = self.clock.now();
        let timer = Instant::now();
        let workers = self.config.workers.max(1);

        let SyncPlan { mode, units, skipped, .. } = plan;
        let (upstream, derived): (Vec<FetchUnit>, Vec<FetchUnit>) =
            units.into_iter().partition(|u| !u.timeframe.is_derived());

        info!(
            mode = %mode,
            upstream = upstream.len(),
            derived = derived.len(),
            skipped = skipped.len(),
            workers,
            "Starting sync run"
        );

        let ctx = Arc::new(UnitContext {
            store: self.store.clone(),
            fetcher: Arc::clone(&self.fetcher),
            calendar: self.calendar.clone(),
            clock: Arc::clone(&self.clock),
            retry: self.config.retry.clone(),
            fetch_timeout: self.config.fetch_timeout,
            progress: ProgressTracker::new(upstream.len() + derived.len()),
        });

        let mut results = skipped;
        results.extend(run_units(&ctx, upstream, workers).await);
        results.extend(run_units(&ctx, derived, workers).await);

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
            failed = run.failed(),
            inserted = run.total_inserted(),
            duplicates = run.total_duplicates(),
            elapsed_ms = run.duration.as_millis() as u64,
            "Sync run finished"
        );
        run
    }

    /// Per-unit freshness without touching upstream
    pub async fn status(&self, symbols: &[String], timeframes: &[Timeframe]) -> Result<Vec<UnitStatus>> {
        StatusReporter::new(&self.db)
            .with_calendar(self.calendar.clone())
            .with_clock(Arc::clone(&self.clock))
            .report(symbols, timeframes)
            .await
    }
}

async fn run_units(ctx: &Arc<UnitContext>, units: Vec<FetchUnit>, workers: usize) -> Vec<UnitResult> {
    stream::iter(units)
        .map(|unit| {
            let ctx = Arc::clone(ctx);
            async move {
                let symbol = unit.symbol.clone();
                let timeframe = unit.timeframe;
                match tokio::spawn(async move { ctx.process(unit).await }).await {
                    Ok(result) => result,
                    Err(e) => {
                        error!(symbol = %symbol, timeframe = %timeframe, error = %e, "Worker task aborted");
                        UnitResult::failed(symbol, Some(timeframe), 0, format!("worker task aborted: {}", e))
                    }
                }
            }
        })
        .buffer_unordered(workers)
        .collect()
        .await
}

impl UnitContext {
    async fn process(&self, unit: FetchUnit) -> UnitResult {
        let started = Instant::now();
        let label = format!("{} {}", unit.symbol, unit.timeframe);

        let (fetched, attempts) = match unit.timeframe.source() {
            Some(source) => (self.resample(&unit, source).await, 1),
            None => {
                let fetcher = self.fetcher.as_ref();
                let (symbol, timeframe, range) = (unit.symbol.as_str(), unit.timeframe, &unit.range);
                let (result, attempts) = retry::with_backoff(&self.retry, self.fetch_timeout, &label, move || {
                    fetcher.fetch(symbol, timeframe, range)
                })
                .await;
                (result.map_err(|e| e.to_string()), attempts)
            }
        };

        let result = match fetched {
            Ok(candles) => self.persist(&unit, candles, attempts).await,
            Err(message) => UnitResult::failed(unit.symbol.clone(), Some(unit.timeframe), attempts, message),
        }
        .with_elapsed(started.elapsed());

        let progress = self.progress.record();
        info!(
            symbol = %unit.symbol,
            timeframe = %unit.timeframe,
            outcome = %result.outcome,
            inserted = result.inserted,
            duplicates = result.duplicates,
            attempts = result.attempts,
            percent = %format!("{:.1}", progress.percentage()),
            eta_secs = progress.eta.as_secs(),
            "{}",
            progress.format_display()
        );
        if result.outcome == UnitOutcome::Failed {
            warn!(
                unit = %label,
                attempts = result.attempts,
                error = result.message.as_deref().unwrap_or_default(),
                "Unit failed"
            );
        }
        result
    }

    /// Validate, drop unclosed candles and upsert the rest
    async fn persist(&self, unit: &FetchUnit, candles: Vec<Candle>, attempts: u32) -> UnitResult {
        let now = self.clock.now();
        let mut accepted = Vec::with_capacity(candles.len());
        let mut rejected = 0usize;
        let mut first_reason = None;
        let mut pending = 0usize;

        for candle in candles {
            if let Err(reason) = candle.validate() {
                rejected += 1;
                first_reason.get_or_insert(reason);
                continue;
            }
            if !self.calendar.is_candle_closed(candle.time, unit.timeframe, now) {
                pending += 1;
                continue;
            }
            accepted.push(candle);
        }

        if let Some(reason) = first_reason {
            warn!(symbol = %unit.symbol, timeframe = %unit.timeframe, rejected, first = %reason, "Rejected invalid candles");
        }
        if pending > 0 {
            debug!(symbol = %unit.symbol, timeframe = %unit.timeframe, pending, "Dropped candles that have not closed yet");
        }

        match self.store.upsert_many(&unit.symbol, unit.timeframe, &accepted).await {
            Ok(outcome) => UnitResult::succeeded(
                unit.symbol.clone(),
                Some(unit.timeframe),
                outcome.inserted,
                outcome.skipped,
                attempts,
            )
            .with_rejected(rejected),
            Err(e) => UnitResult::failed(unit.symbol.clone(), Some(unit.timeframe), attempts, format!("store: {}", e))
                .with_rejected(rejected),
        }
    }

    /// Build a derived timeframe from stored source candles
    async fn resample(&self, unit: &FetchUnit, source: Timeframe) -> std::result::Result<Vec<Candle>, String> {
        // widen to the session open so the first bucket is complete
        let start = unit
            .range
            .start
            .map(|s| self.calendar.at_local(self.calendar.local_date(s), self.calendar.session_open));
        let query = CandleQuery {
            start,
            end: Some(unit.range.end),
            limit: None,
        };
        let candles = self
            .store
            .range_query(&unit.symbol, source, query)
            .await
            .map_err(|e| format!("reading {} candles: {}", source, e))?;
        Ok(Resampler::resample(&candles, source, unit.timeframe, &self.calendar))
    }
}
