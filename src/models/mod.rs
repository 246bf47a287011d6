mod candle;
mod fundamentals;
mod instrument;
mod sync_config;
mod sync_run;
mod timeframe;

pub use candle::Candle;
pub use fundamentals::{FundamentalMetrics, FundamentalsSnapshot};
pub use instrument::Instrument;
pub use sync_config::{
    FetchKind, FetchProgress, FetchRange, FetchUnit, ProgressTracker, RetryPolicy, SyncConfig, SyncMode,
};
pub use sync_run::{SyncRun, UnitOutcome, UnitResult};
pub use timeframe::Timeframe;
