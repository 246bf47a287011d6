pub mod candle_store;
pub mod clock;
pub mod data_sync;
pub mod database;
pub mod fundamentals_store;
pub mod fundamentals_sync;
pub mod instrument_registry;
pub mod market_calendar;
pub mod market_data;
pub mod notifier;
pub mod rate_limiter;
pub mod resampler;
pub mod retry;
pub mod status_report;
pub mod yahoo;

pub use candle_store::{CandleQuery, CandleStore, UpsertOutcome};
pub use clock::{Clock, FixedClock, SystemClock};
pub use data_sync::{DataSync, SyncPlan};
pub use database::Database;
pub use fundamentals_store::{FailureRecord, FundamentalsStore};
pub use fundamentals_sync::{FailurePolicy, FundamentalsPlan, FundamentalsSync, FundamentalsSyncConfig};
pub use instrument_registry::{InstrumentRegistry, SeedReport};
pub use market_calendar::MarketCalendar;
pub use market_data::{FetchError, FundamentalsFetcher, MarketDataFetcher};
pub use notifier::{NotificationSink, TelegramNotifier};
pub use rate_limiter::SharedRateLimiter;
pub use resampler::Resampler;
pub use status_report::{StatusReporter, UnitStatus};
pub use yahoo::YahooClient;
