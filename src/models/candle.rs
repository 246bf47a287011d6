use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Relative slack allowed when checking high/low against open/close.
/// Upstream prices are floats rounded independently per field.
const PRICE_TOLERANCE: f64 = 1e-6;

/// One OHLCV bar. `time` is the bar's open instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub time: DateTime<Utc>,

    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,

    /// Number of trades, when the source reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_count: Option<u64>,
}

impl Candle {
    pub fn new(time: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64, volume: u64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume,
            trade_count: None,
        }
    }

    /// Check the price invariants: finite positive prices and
    /// `low <= min(open, close) <= max(open, close) <= high`.
    pub fn validate(&self) -> Result<(), String> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(format!(
                "non-positive or non-finite price at {} (o={} h={} l={} c={})",
                self.time, self.open, self.high, self.low, self.close
            ));
        }

        let slack = self.high.abs().max(1.0) * PRICE_TOLERANCE;
        let body_top = self.open.max(self.close);
        let body_bottom = self.open.min(self.close);
        if self.high + slack < body_top {
            return Err(format!("high {} below body top {} at {}", self.high, body_top, self.time));
        }
        if self.low - slack > body_bottom {
            return Err(format!("low {} above body bottom {} at {}", self.low, body_bottom, self.time));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}
