use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error as ThisError;

use crate::models::{Candle, FetchRange, FundamentalsSnapshot, Timeframe};

/// Failure of one upstream call, classified for the retry loop
#[derive(ThisError, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("Rate limited by upstream")]
    RateLimited,

    #[error("Symbol not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Upstream error (HTTP {status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Unparseable payload: {0}")]
    Parse(String),
}

impl FetchError {
    /// Worth another attempt after a backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited | FetchError::Network(_) | FetchError::Timeout(_) | FetchError::Upstream { .. }
        )
    }
}

/// Source of historical candles
#[async_trait]
pub trait MarketDataFetcher: Send + Sync {
    /// Candles for `symbol` inside `range`, oldest first. No data is `Ok(vec![])`.
    async fn fetch(&self, symbol: &str, timeframe: Timeframe, range: &FetchRange) -> Result<Vec<Candle>, FetchError>;
}

/// Source of fundamentals snapshots
#[async_trait]
pub trait FundamentalsFetcher: Send + Sync {
    async fn fetch_fundamentals(&self, symbol: &str) -> Result<FundamentalsSnapshot, FetchError>;
}
