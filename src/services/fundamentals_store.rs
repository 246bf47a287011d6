use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::{AppError, Result};
use crate::models::{FundamentalMetrics, FundamentalsSnapshot};

/// Failure bookkeeping for one symbol
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord {
    pub symbol: String,
    pub consecutive_failures: u32,
    pub last_error: String,
    pub last_attempt: DateTime<Utc>,
}

/// Latest fundamentals per symbol plus the permanent-failure ledger
#[derive(Debug, Clone)]
pub struct FundamentalsStore {
    pool: SqlitePool,
}

const METRIC_COLUMNS: &str = "current_price, previous_close, fifty_two_week_low, fifty_two_week_high, \
    market_cap, enterprise_value, trailing_pe, forward_pe, price_to_book, peg_ratio, \
    profit_margins, operating_margins, return_on_equity, return_on_assets, \
    revenue_growth, earnings_growth, total_cash, total_debt, debt_to_equity, current_ratio, \
    dividend_rate, dividend_yield, payout_ratio, average_volume, shares_outstanding, beta, \
    target_mean_price, recommendation_key, sector, industry";

impl FundamentalsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Replace the symbol's row wholesale
    pub async fn upsert(&self, snapshot: &FundamentalsSnapshot) -> Result<()> {
        let m = &snapshot.metrics;
        let sql = format!(
            "INSERT OR REPLACE INTO fundamentals (symbol, {}, raw_data, updated_at) VALUES ({})",
            METRIC_COLUMNS,
            (1..=33).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
        );

        sqlx::query(&sql)
            .bind(&snapshot.symbol)
            .bind(m.current_price)
            .bind(m.previous_close)
            .bind(m.fifty_two_week_low)
            .bind(m.fifty_two_week_high)
            .bind(m.market_cap)
            .bind(m.enterprise_value)
            .bind(m.trailing_pe)
            .bind(m.forward_pe)
            .bind(m.price_to_book)
            .bind(m.peg_ratio)
            .bind(m.profit_margins)
            .bind(m.operating_margins)
            .bind(m.return_on_equity)
            .bind(m.return_on_assets)
            .bind(m.revenue_growth)
            .bind(m.earnings_growth)
            .bind(m.total_cash)
            .bind(m.total_debt)
            .bind(m.debt_to_equity)
            .bind(m.current_ratio)
            .bind(m.dividend_rate)
            .bind(m.dividend_yield)
            .bind(m.payout_ratio)
            .bind(m.average_volume)
            .bind(m.shares_outstanding)
            .bind(m.beta)
            .bind(m.target_mean_price)
            .bind(&m.recommendation_key)
            .bind(&m.sector)
            .bind(&m.industry)
            .bind(snapshot.raw_data.to_string())
            .bind(snapshot.updated_at.timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get(&self, symbol: &str) -> Result<Option<FundamentalsSnapshot>> {
        let sql = format!(
            "SELECT symbol, {}, raw_data, updated_at FROM fundamentals WHERE symbol = ?1",
            METRIC_COLUMNS
        );
        let Some(row) = sqlx::query(&sql).bind(symbol).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };

        let metrics = <FundamentalMetrics as sqlx::FromRow<_>>::from_row(&row)?;
        let raw: String = row.try_get("raw_data")?;
        Ok(Some(FundamentalsSnapshot {
            symbol: row.try_get("symbol")?,
            metrics,
            raw_data: serde_json::from_str(&raw)?,
            updated_at: from_epoch(row.try_get("updated_at")?)?,
        }))
    }

    /// When the symbol was last refreshed, if ever
    pub async fn updated_at(&self, symbol: &str) -> Result<Option<DateTime<Utc>>> {
        let ts: Option<i64> = sqlx::query_scalar("SELECT updated_at FROM fundamentals WHERE symbol = ?1")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        ts.map(from_epoch).transpose()
    }

    /// Bump the consecutive failure count and return the new value
    pub async fn record_failure(&self, symbol: &str, error: &str, at: DateTime<Utc>) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO fundamentals_failures (symbol, consecutive_failures, last_error, last_attempt)
            VALUES (?1, 1, ?2, ?3)
            ON CONFLICT(symbol) DO UPDATE SET
                consecutive_failures = consecutive_failures + 1,
                last_error = excluded.last_error,
                last_attempt = excluded.last_attempt
            RETURNING consecutive_failures
            "#,
        )
        .bind(symbol)
        .bind(error)
        .bind(at.timestamp())
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u32)
    }

    pub async fn clear_failures(&self, symbol: &str) -> Result<()> {
        sqlx::query("DELETE FROM fundamentals_failures WHERE symbol = ?1")
            .bind(symbol)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn failure(&self, symbol: &str) -> Result<Option<FailureRecord>> {
        let row = sqlx::query(
            "SELECT symbol, consecutive_failures, last_error, last_attempt FROM fundamentals_failures WHERE symbol = ?1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let count: i64 = row.try_get("consecutive_failures")?;
                Ok(Some(FailureRecord {
                    symbol: row.try_get("symbol")?,
                    consecutive_failures: count.max(0) as u32,
                    last_error: row.try_get("last_error")?,
                    last_attempt: from_epoch(row.try_get("last_attempt")?)?,
                }))
            }
            None => Ok(None),
        }
    }

    pub async fn failure_count(&self, symbol: &str) -> Result<u32> {
        Ok(self.failure(symbol).await?.map(|f| f.consecutive_failures).unwrap_or(0))
    }
}

fn from_epoch(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| AppError::Parse(format!("invalid stored timestamp {}", secs)))
}
