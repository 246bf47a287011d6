pub mod candles;
pub mod fundamentals;
pub mod seed;
pub mod status;
pub mod sync;
pub mod watch;

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::services::{Database, SharedRateLimiter, YahooClient};

/// Print an error and exit with status 1
pub(crate) fn exit_with_error(context: &str, err: impl Display) -> ! {
    eprintln!("❌ {}: {}", context, err);
    std::process::exit(1);
}

/// Drive an async command body to completion on a fresh multi-threaded runtime
pub(crate) fn block_on<F: Future>(future: F) -> F::Output {
    match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime.block_on(future),
        Err(e) => exit_with_error("Failed to create runtime", e),
    }
}

pub(crate) fn load_config() -> AppConfig {
    match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => exit_with_error("Invalid configuration", e),
    }
}

/// Open the store and verify it answers before any work starts
pub(crate) async fn open_database(config: &AppConfig) -> Result<Database> {
    let db = Database::connect(&config.database_path).await?;
    db.ping()
        .await
        .map_err(|e| AppError::Database(format!("{} is not reachable: {}", config.database_path.display(), e)))?;
    Ok(db)
}

/// Yahoo client sharing one rate limiter across every worker
pub(crate) fn yahoo_client(config: &AppConfig) -> Result<Arc<YahooClient>> {
    let limiter = Arc::new(SharedRateLimiter::new(config.min_request_interval));
    Ok(Arc::new(YahooClient::new(limiter, config.fetch_timeout)?))
}
