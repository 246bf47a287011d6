use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

use crate::error::{AppError, Result};
use crate::models::{Candle, Timeframe};

/// Insert counts for one `upsert_many` call
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub inserted: usize,
    /// Rows whose (time, symbol, timeframe) already existed
    pub skipped: usize,
}

/// Filters for `range_query`
#[derive(Debug, Default, Clone, Copy)]
pub struct CandleQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

/// Time-series store for candles.
///
/// Deduplication lives in the `(time, symbol, timeframe)` primary key: every
/// row is inserted with `INSERT OR IGNORE`, so repeated and concurrent writes
/// of the same candle are no-ops.
#[derive(Debug, Clone)]
pub struct CandleStore {
    pool: SqlitePool,
}

impl CandleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a batch in one transaction, ignoring rows that already exist
    pub async fn upsert_many(&self, symbol: &str, timeframe: Timeframe, rows: &[Candle]) -> Result<UpsertOutcome> {
        if rows.is_empty() {
            return Ok(UpsertOutcome::default());
        }

        let mut transaction = self.pool.begin().await?;
        let mut inserted = 0usize;

        for candle in rows {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO candles (time, symbol, timeframe, open, high, low, close, volume, trade_count)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(candle.time.timestamp())
            .bind(symbol)
            .bind(timeframe.as_str())
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .bind(to_sql_int(candle.volume))
            .bind(candle.trade_count.map(to_sql_int))
            .execute(&mut *transaction)
            .await?;

            inserted += result.rows_affected() as usize;
        }

        transaction.commit().await?;

        let outcome = UpsertOutcome {
            inserted,
            skipped: rows.len() - inserted,
        };
        debug!(
            symbol,
            timeframe = %timeframe,
            inserted = outcome.inserted,
            skipped = outcome.skipped,
            "Upserted candles"
        );
        Ok(outcome)
    }

    /// Open time of the newest stored candle
    pub async fn latest_timestamp(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(time) FROM candles WHERE symbol = ?1 AND timeframe = ?2")
                .bind(symbol)
                .bind(timeframe.as_str())
                .fetch_one(&self.pool)
                .await?;

        latest.map(from_epoch).transpose()
    }

    /// Candles ascending by open time. With a limit and no start, the most
    /// recent `limit` candles are returned (still ascending).
    pub async fn range_query(&self, symbol: &str, timeframe: Timeframe, query: CandleQuery) -> Result<Vec<Candle>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT time, open, high, low, close, volume, trade_count FROM candles WHERE symbol = ",
        );
        builder.push_bind(symbol);
        builder.push(" AND timeframe = ").push_bind(timeframe.as_str());

        if let Some(start) = query.start {
            builder.push(" AND time >= ").push_bind(start.timestamp());
        }
        if let Some(end) = query.end {
            builder.push(" AND time <= ").push_bind(end.timestamp());
        }

        let newest_first = query.limit.is_some() && query.start.is_none();
        builder.push(if newest_first { " ORDER BY time DESC" } else { " ORDER BY time ASC" });
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        let mut candles = rows.iter().map(row_to_candle).collect::<Result<Vec<_>>>()?;
        if newest_first {
            candles.reverse();
        }
        Ok(candles)
    }

    pub async fn count(&self, symbol: &str, timeframe: Timeframe) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM candles WHERE symbol = ?1 AND timeframe = ?2")
            .bind(symbol)
            .bind(timeframe.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    /// Oldest stored open time, shown by the status report
    pub async fn earliest_timestamp(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<DateTime<Utc>>> {
        let earliest: Option<i64> =
            sqlx::query_scalar("SELECT MIN(time) FROM candles WHERE symbol = ?1 AND timeframe = ?2")
                .bind(symbol)
                .bind(timeframe.as_str())
                .fetch_one(&self.pool)
                .await?;

        earliest.map(from_epoch).transpose()
    }
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_epoch(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| AppError::Parse(format!("invalid stored timestamp {}", secs)))
}

fn row_to_candle(row: &sqlx::sqlite::SqliteRow) -> Result<Candle> {
    let volume: i64 = row.try_get("volume")?;
    let trade_count: Option<i64> = row.try_get("trade_count")?;
    Ok(Candle {
        time: from_epoch(row.try_get("time")?)?,
        open: row.try_get("open")?,
        high: row.try_get("high")?,
        low: row.try_get("low")?,
        close: row.try_get("close")?,
        volume: volume.max(0) as u64,
        trade_count: trade_count.map(|n| n.max(0) as u64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::database::testing::seeded_database;
    use chrono::{Duration, TimeZone};

    fn candles(start: DateTime<Utc>, n: usize, step: Duration) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let px = 100.0 + i as f64;
                Candle::new(start + step * i as i32, px, px + 2.0, px - 1.0, px + 1.0, 1_000 + i as u64)
            })
            .collect()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 3, 45, 0).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_many_is_idempotent() {
        let (_dir, db) = seeded_database(&["TCS.NS"]).await;
        let store = CandleStore::new(db.pool().clone());
        let rows = candles(t0(), 20, Duration::minutes(15));

        let first = store.upsert_many("TCS.NS", Timeframe::Minute15, &rows).await.unwrap();
        assert_eq!(first, UpsertOutcome { inserted: 20, skipped: 0 });

        let second = store.upsert_many("TCS.NS", Timeframe::Minute15, &rows).await.unwrap();
        assert_eq!(second, UpsertOutcome { inserted: 0, skipped: 20 });

        assert_eq!(store.count("TCS.NS", Timeframe::Minute15).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_duplicates_inside_one_batch() {
        let (_dir, db) = seeded_database(&["TCS.NS"]).await;
        let store = CandleStore::new(db.pool().clone());
        let mut rows = candles(t0(), 3, Duration::days(1));
        rows.push(rows[2].clone());

        let outcome = store.upsert_many("TCS.NS", Timeframe::Day1, &rows).await.unwrap();
        assert_eq!(outcome, UpsertOutcome { inserted: 3, skipped: 1 });
    }

    #[tokio::test]
    async fn test_timeframes_are_independent() {
        let (_dir, db) = seeded_database(&["TCS.NS"]).await;
        let store = CandleStore::new(db.pool().clone());
        let rows = candles(t0(), 5, Duration::hours(1));

        store.upsert_many("TCS.NS", Timeframe::Hour1, &rows).await.unwrap();
        let other = store.upsert_many("TCS.NS", Timeframe::Minute5, &rows).await.unwrap();
        assert_eq!(other.inserted, 5);
    }

    #[tokio::test]
    async fn test_concurrent_writers_do_not_duplicate() {
        let (_dir, db) = seeded_database(&["INFY.NS"]).await;
        let store = CandleStore::new(db.pool().clone());
        let rows = candles(t0(), 200, Duration::minutes(5));

        // eight writers over overlapping windows of the same 200 candles
        let mut handles = Vec::new();
        for i in 0..8usize {
            let store = store.clone();
            let slice = rows[(i * 15)..(i * 15 + 80)].to_vec();
            handles.push(tokio::spawn(async move {
                store.upsert_many("INFY.NS", Timeframe::Minute5, &slice).await
            }));
        }
        let mut inserted = 0;
        for handle in handles {
            inserted += handle.await.unwrap().unwrap().inserted;
        }

        let distinct = 7 * 15 + 80;
        assert_eq!(inserted, distinct);
        assert_eq!(store.count("INFY.NS", Timeframe::Minute5).await.unwrap(), distinct);
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_rejected_by_foreign_key() {
        let (_dir, db) = seeded_database(&["TCS.NS"]).await;
        let store = CandleStore::new(db.pool().clone());
        let rows = candles(t0(), 1, Duration::days(1));
        let result = store.upsert_many("NOPE.NS", Timeframe::Day1, &rows).await;
        assert!(matches!(result, Err(AppError::Database(_))));
    }

    #[tokio::test]
    async fn test_latest_timestamp() {
        let (_dir, db) = seeded_database(&["TCS.NS"]).await;
        let store = CandleStore::new(db.pool().clone());
        assert_eq!(store.latest_timestamp("TCS.NS", Timeframe::Day1).await.unwrap(), None);

        let rows = candles(t0(), 10, Duration::days(1));
        store.upsert_many("TCS.NS", Timeframe::Day1, &rows).await.unwrap();
        assert_eq!(
            store.latest_timestamp("TCS.NS", Timeframe::Day1).await.unwrap(),
            Some(t0() + Duration::days(9))
        );
        assert_eq!(store.earliest_timestamp("TCS.NS", Timeframe::Day1).await.unwrap(), Some(t0()));
    }

    #[tokio::test]
    async fn test_range_query() {
        let (_dir, db) = seeded_database(&["TCS.NS"]).await;
        let store = CandleStore::new(db.pool().clone());
        let rows = candles(t0(), 10, Duration::days(1));
        store.upsert_many("TCS.NS", Timeframe::Day1, &rows).await.unwrap();

        let all = store.range_query("TCS.NS", Timeframe::Day1, CandleQuery::default()).await.unwrap();
        assert_eq!(all, rows);

        let window = store
            .range_query(
                "TCS.NS",
                Timeframe::Day1,
                CandleQuery {
                    start: Some(t0() + Duration::days(2)),
                    end: Some(t0() + Duration::days(4)),
                    limit: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(window, rows[2..=4].to_vec());

        // most recent three, ascending
        let tail = store
            .range_query("TCS.NS", Timeframe::Day1, CandleQuery { limit: Some(3), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(tail, rows[7..].to_vec());

        // first two from a start
        let head = store
            .range_query(
                "TCS.NS",
                Timeframe::Day1,
                CandleQuery { start: Some(t0()), end: None, limit: Some(2) },
            )
            .await
            .unwrap();
        assert_eq!(head, rows[..2].to_vec());
    }
}
