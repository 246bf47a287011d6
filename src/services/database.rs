use sqlx::sqlite::{SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::constants::DB_SCHEMA_VERSION;
use crate::error::{AppError, Result};

/// Shared SQLite handle. Stores are built from clones of its pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    path: PathBuf,
}

impl Database {
    /// Open (or create) the database file and make sure the schema exists
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        info!(path = %path.display(), "Opening SQLite database");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let connect_options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal) // readers never block the writer
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30)) // concurrent writers wait instead of failing
            .foreign_keys(true)
            .auto_vacuum(SqliteAutoVacuum::Incremental);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(connect_options)
            .await?;

        let db = Self { pool, path };
        db.initialize_schema().await?;
        Ok(db)
    }

    async fn initialize_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS instruments (
                symbol TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                exchange TEXT NOT NULL DEFAULT 'NSE',
                sector TEXT,
                industry TEXT,
                is_nifty_50 INTEGER NOT NULL DEFAULT 0,
                is_nifty_100 INTEGER NOT NULL DEFAULT 1,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS candles (
                time INTEGER NOT NULL,
                symbol TEXT NOT NULL REFERENCES instruments(symbol),
                timeframe TEXT NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume INTEGER NOT NULL,
                trade_count INTEGER,
                PRIMARY KEY (time, symbol, timeframe)
            )
            "#,
            // latest_timestamp and range queries filter on (symbol, timeframe) first
            "CREATE INDEX IF NOT EXISTS idx_candles_symbol_tf_time ON candles(symbol, timeframe, time DESC)",
            r#"
            CREATE TABLE IF NOT EXISTS fundamentals (
                symbol TEXT PRIMARY KEY REFERENCES instruments(symbol),
                current_price REAL,
                previous_close REAL,
                fifty_two_week_low REAL,
                fifty_two_week_high REAL,
                market_cap REAL,
                enterprise_value REAL,
                trailing_pe REAL,
                forward_pe REAL,
                price_to_book REAL,
                peg_ratio REAL,
                profit_margins REAL,
                operating_margins REAL,
                return_on_equity REAL,
                return_on_assets REAL,
                revenue_growth REAL,
                earnings_growth REAL,
                total_cash REAL,
                total_debt REAL,
                debt_to_equity REAL,
                current_ratio REAL,
                dividend_rate REAL,
                dividend_yield REAL,
                payout_ratio REAL,
                average_volume REAL,
                shares_outstanding REAL,
                beta REAL,
                target_mean_price REAL,
                recommendation_key TEXT,
                sector TEXT,
                industry TEXT,
                raw_data TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS fundamentals_failures (
                symbol TEXT PRIMARY KEY REFERENCES instruments(symbol),
                consecutive_failures INTEGER NOT NULL,
                last_error TEXT NOT NULL,
                last_attempt INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        sqlx::query("INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)")
            .bind(DB_SCHEMA_VERSION)
            .execute(&self.pool)
            .await?;

        debug!(version = DB_SCHEMA_VERSION, "Database schema ready");
        Ok(())
    }

    /// Connectivity check run before any worker starts
    pub async fn ping(&self) -> Result<()> {
        let one: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("store unreachable: {}", e)))?;
        if one != 1 {
            return Err(AppError::Database("unexpected reply to SELECT 1".to_string()));
        }
        Ok(())
    }

    pub async fn schema_version(&self) -> Result<Option<String>> {
        let version = sqlx::query_scalar("SELECT value FROM metadata WHERE key = 'schema_version'")
            .fetch_optional(&self.pool)
            .await?;
        Ok(version)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Database;
    use crate::models::Instrument;
    use crate::services::InstrumentRegistry;
    use tempfile::TempDir;

    /// Fresh database in a temp dir; keep the `TempDir` alive for the test's duration
    pub async fn temp_database() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect(dir.path().join("test.db")).await.unwrap();
        (dir, db)
    }

    /// Fresh database with the given symbols registered as active instruments
    pub async fn seeded_database(symbols: &[&str]) -> (TempDir, Database) {
        let (dir, db) = temp_database().await;
        let registry = InstrumentRegistry::new(db.pool().clone());
        let instruments: Vec<Instrument> = symbols.iter().map(|s| Instrument::new(*s, *s)).collect();
        registry.seed(&instruments).await.unwrap();
        (dir, db)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::temp_database;
    use super::*;

    #[tokio::test]
    async fn test_database_creation() {
        let (dir, db) = temp_database().await;
        assert!(dir.path().join("test.db").is_file());
        assert_eq!(db.path(), dir.path().join("test.db"));
        db.ping().await.unwrap();
        assert_eq!(db.schema_version().await.unwrap().as_deref(), Some(DB_SCHEMA_VERSION));
        db.close().await;
    }

    #[tokio::test]
    async fn test_reopen_keeps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");
        let first = Database::connect(&path).await.unwrap();
        first.close().await;

        let second = Database::connect(&path).await.unwrap();
        second.ping().await.unwrap();
        second.close().await;
    }

    #[tokio::test]
    async fn test_ping_fails_after_close() {
        let (_dir, db) = temp_database().await;
        db.close().await;
        assert!(matches!(db.ping().await, Err(AppError::Database(_))));
    }
}
