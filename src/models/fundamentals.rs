use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Typed metrics kept as columns of the `fundamentals` table.
/// Anything upstream reports beyond these stays available in the raw payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FundamentalMetrics {
    // Price
    pub current_price: Option<f64>,
    pub previous_close: Option<f64>,
    pub fifty_two_week_low: Option<f64>,
    pub fifty_two_week_high: Option<f64>,

    // Valuation
    pub market_cap: Option<f64>,
    pub enterprise_value: Option<f64>,
    pub trailing_pe: Option<f64>,
    pub forward_pe: Option<f64>,
    pub price_to_book: Option<f64>,
    pub peg_ratio: Option<f64>,

    // Profitability
    pub profit_margins: Option<f64>,
    pub operating_margins: Option<f64>,
    pub return_on_equity: Option<f64>,
    pub return_on_assets: Option<f64>,

    // Growth
    pub revenue_growth: Option<f64>,
    pub earnings_growth: Option<f64>,

    // Financial health
    pub total_cash: Option<f64>,
    pub total_debt: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub current_ratio: Option<f64>,

    // Dividends
    pub dividend_rate: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub payout_ratio: Option<f64>,

    // Liquidity and risk
    pub average_volume: Option<f64>,
    pub shares_outstanding: Option<f64>,
    pub beta: Option<f64>,

    // Analysts
    pub target_mean_price: Option<f64>,
    pub recommendation_key: Option<String>,

    // Classification
    pub sector: Option<String>,
    pub industry: Option<String>,
}

impl FundamentalMetrics {
    /// Number of populated metrics
    pub fn populated(&self) -> usize {
        let numbers = [
            self.current_price,
            self.previous_close,
            self.fifty_two_week_low,
            self.fifty_two_week_high,
            self.market_cap,
            self.enterprise_value,
            self.trailing_pe,
            self.forward_pe,
            self.price_to_book,
            self.peg_ratio,
            self.profit_margins,
            self.operating_margins,
            self.return_on_equity,
            self.return_on_assets,
            self.revenue_growth,
            self.earnings_growth,
            self.total_cash,
            self.total_debt,
            self.debt_to_equity,
            self.current_ratio,
            self.dividend_rate,
            self.dividend_yield,
            self.payout_ratio,
            self.average_volume,
            self.shares_outstanding,
            self.beta,
            self.target_mean_price,
        ];
        let texts = [&self.recommendation_key, &self.sector, &self.industry];
        numbers.iter().filter(|v| v.is_some()).count() + texts.iter().filter(|v| v.is_some()).count()
    }
}

/// Point-in-time fundamentals for one symbol. Refreshing replaces the whole row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundamentalsSnapshot {
    pub symbol: String,
    pub metrics: FundamentalMetrics,
    /// Upstream payload as received
    pub raw_data: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl FundamentalsSnapshot {
    /// True when the snapshot is younger than `staleness` at `now`
    pub fn is_fresh(&self, now: DateTime<Utc>, staleness: chrono::Duration) -> bool {
        now - self.updated_at < staleness
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_populated_counts_only_present_values() {
        let mut metrics = FundamentalMetrics::default();
        assert_eq!(metrics.populated(), 0);
        metrics.trailing_pe = Some(24.5);
        metrics.sector = Some("Energy".to_string());
        assert_eq!(metrics.populated(), 2);
    }

    #[test]
    fn test_snapshot_freshness() {
        let updated_at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let snapshot = FundamentalsSnapshot {
            symbol: "TCS.NS".to_string(),
            metrics: FundamentalMetrics::default(),
            raw_data: serde_json::json!({}),
            updated_at,
        };
        assert!(snapshot.is_fresh(updated_at + Duration::hours(23), Duration::hours(24)));
        assert!(!snapshot.is_fresh(updated_at + Duration::hours(24), Duration::hours(24)));
    }
}
