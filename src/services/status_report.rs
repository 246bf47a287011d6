use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::warn;

use crate::error::Result;
use crate::models::Timeframe;
use crate::services::candle_store::CandleStore;
use crate::services::clock::{Clock, SystemClock};
use crate::services::{Database, InstrumentRegistry, MarketCalendar};

/// Freshness report for one (symbol, timeframe), produced without fetching
#[derive(Debug, Clone)]
pub struct UnitStatus {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    pub count: usize,
    /// Date the smart-skip rule compares against
    pub reference_date: NaiveDate,
    /// Age of the latest candle at report time
    pub age: Option<Duration>,
    /// An incremental sync would skip this unit
    pub up_to_date: bool,
    /// Age exceeds the timeframe's resync window
    pub stale: bool,
}

/// Reads coverage and freshness straight from the store. Needs no market
/// data client.
#[derive(Clone)]
pub struct StatusReporter {
    store: CandleStore,
    registry: InstrumentRegistry,
    calendar: MarketCalendar,
    clock: Arc<dyn Clock>,
}

impl StatusReporter {
    pub fn new(db: &Database) -> Self {
        Self {
            store: CandleStore::new(db.pool().clone()),
            registry: InstrumentRegistry::new(db.pool().clone()),
            calendar: MarketCalendar::default(),
            clock: Arc::new(SystemClock),
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

    pub fn calendar(&self) -> &MarketCalendar {
        &self.calendar
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Requested symbols, or every active instrument
    pub async fn resolve_symbols(&self, requested: Option<&[String]>) -> Result<Vec<String>> {
        match requested {
            Some(symbols) => {
                for symbol in symbols {
                    if self.registry.get(symbol).await?.is_none() {
                        warn!(symbol = %symbol, "Symbol is not in the instrument registry");
                    }
                }
                Ok(symbols.to_vec())
            }
            None => self.registry.active_symbols().await,
        }
    }

    pub async fn report(&self, symbols: &[String], timeframes: &[Timeframe]) -> Result<Vec<UnitStatus>> {
        let now = self.clock.now();
        let reference_date = self.calendar.reference_date(now);
        let mut report = Vec::with_capacity(symbols.len() * timeframes.len());

        for &timeframe in timeframes {
            for symbol in symbols {
                let latest = self.store.latest_timestamp(symbol, timeframe).await?;
                let earliest = self.store.earliest_timestamp(symbol, timeframe).await?;
                let count = self.store.count(symbol, timeframe).await?;
                let age = latest.map(|t| now - t);
                report.push(UnitStatus {
                    symbol: symbol.clone(),
                    timeframe,
                    earliest,
                    latest,
                    count,
                    reference_date,
                    age,
                    up_to_date: latest
                        .map(|t| self.calendar.is_unit_up_to_date(t, timeframe, now))
                        .unwrap_or(false),
                    stale: age.map(|a| a > timeframe.resync_window()).unwrap_or(true),
                });
            }
        }
        Ok(report)
    }
}
