use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::error::Result;
use crate::models::Instrument;

/// Counts from a seeding pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub inserted: usize,
    pub updated: usize,
}

/// The tradable universe, persisted in the `instruments` table
#[derive(Debug, Clone)]
pub struct InstrumentRegistry {
    pool: SqlitePool,
}

impl InstrumentRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or update one instrument by symbol. Returns true when the row is new.
    pub async fn upsert(&self, instrument: &Instrument) -> Result<bool> {
        let existed: Option<i64> = sqlx::query_scalar("SELECT 1 FROM instruments WHERE symbol = ?1")
            .bind(&instrument.symbol)
            .fetch_optional(&self.pool)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO instruments (symbol, name, exchange, sector, industry, is_nifty_50, is_nifty_100, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(symbol) DO UPDATE SET
                name = excluded.name,
                exchange = excluded.exchange,
                sector = excluded.sector,
                industry = excluded.industry,
                is_nifty_50 = excluded.is_nifty_50,
                is_nifty_100 = excluded.is_nifty_100,
                is_active = excluded.is_active,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&instrument.symbol)
        .bind(&instrument.name)
        .bind(&instrument.exchange)
        .bind(&instrument.sector)
        .bind(&instrument.industry)
        .bind(instrument.is_nifty_50)
        .bind(instrument.is_nifty_100)
        .bind(instrument.is_active)
        .execute(&self.pool)
        .await?;

        debug!(symbol = %instrument.symbol, new = existed.is_none(), "Upserted instrument");
        Ok(existed.is_none())
    }

    /// Upsert a whole list
    pub async fn seed(&self, instruments: &[Instrument]) -> Result<SeedReport> {
        let mut report = SeedReport::default();
        for instrument in instruments {
            if self.upsert(instrument).await? {
                report.inserted += 1;
            } else {
                report.updated += 1;
            }
        }
        info!(inserted = report.inserted, updated = report.updated, "Seeded instruments");
        Ok(report)
    }

    /// Active instruments ordered by symbol
    pub async fn list_active(&self) -> Result<Vec<Instrument>> {
        let rows = sqlx::query(
            "SELECT symbol, name, exchange, sector, industry, is_nifty_50, is_nifty_100, is_active \
             FROM instruments WHERE is_active = 1 ORDER BY symbol",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_instrument).collect()
    }

    pub async fn get(&self, symbol: &str) -> Result<Option<Instrument>> {
        let row = sqlx::query(
            "SELECT symbol, name, exchange, sector, industry, is_nifty_50, is_nifty_100, is_active \
             FROM instruments WHERE symbol = ?1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_instrument).transpose()
    }

    /// Symbols of every active instrument
    pub async fn active_symbols(&self) -> Result<Vec<String>> {
        Ok(self.list_active().await?.into_iter().map(|i| i.symbol).collect())
    }
}

fn row_to_instrument(row: &sqlx::sqlite::SqliteRow) -> Result<Instrument> {
    Ok(Instrument {
        symbol: row.try_get("symbol")?,
        name: row.try_get("name")?,
        exchange: row.try_get("exchange")?,
        sector: row.try_get("sector")?,
        industry: row.try_get("industry")?,
        is_nifty_50: row.try_get("is_nifty_50")?,
        is_nifty_100: row.try_get("is_nifty_100")?,
        is_active: row.try_get("is_active")?,
    })
}
