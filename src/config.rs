use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;
use chrono_tz::Tz;

use crate::constants::{market, DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_MIN_REQUEST_INTERVAL_MS};
use crate::error::{AppError, Result};
use crate::services::MarketCalendar;
use crate::utils::env_var;

/// Runtime configuration resolved from the environment (and `.env`, loaded by `main`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub instruments_file: PathBuf,
    pub calendar: MarketCalendar,
    /// Minimum spacing between upstream requests, shared by all workers
    pub min_request_interval: Duration,
    pub fetch_timeout: Duration,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/ztrader.db"),
            instruments_file: PathBuf::from("instruments.json"),
            calendar: MarketCalendar::default(),
            min_request_interval: Duration::from_millis(DEFAULT_MIN_REQUEST_INTERVAL_MS),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            telegram_bot_token: None,
            telegram_chat_id: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_path = env_var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data/ztrader.db"));
        let instruments_file = env_var("INSTRUMENTS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("instruments.json"));

        let timezone: Tz = env_var("MARKET_TIMEZONE")
            .unwrap_or_else(|| market::TIMEZONE.to_string())
            .parse()
            .map_err(|e| AppError::Config(format!("MARKET_TIMEZONE: {}", e)))?;
        let session_open = parse_session_time(
            "MARKET_OPEN",
            &env_var("MARKET_OPEN").unwrap_or_else(|| market::SESSION_OPEN.to_string()),
        )?;
        let session_close = parse_session_time(
            "MARKET_CLOSE",
            &env_var("MARKET_CLOSE").unwrap_or_else(|| market::SESSION_CLOSE.to_string()),
        )?;
        if session_close <= session_open {
            return Err(AppError::Config(format!(
                "MARKET_CLOSE ({}) must be after MARKET_OPEN ({})",
                session_close, session_open
            )));
        }

        let min_request_interval = Duration::from_millis(parse_u64(
            "YAHOO_MIN_INTERVAL_MS",
            DEFAULT_MIN_REQUEST_INTERVAL_MS,
        )?);
        let fetch_timeout =
            Duration::from_secs(parse_u64("FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT_SECS)?);
        if fetch_timeout.is_zero() {
            return Err(AppError::Config("FETCH_TIMEOUT_SECS must be positive".to_string()));
        }

        Ok(Self {
            database_path,
            instruments_file,
            calendar: MarketCalendar::new(timezone, session_open, session_close),
            min_request_interval,
            fetch_timeout,
            telegram_bot_token: env_var("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: env_var("TELEGRAM_CHAT_ID"),
        })
    }
}

fn parse_session_time(key: &str, raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|e| AppError::Config(format!("{} '{}' is not HH:MM: {}", key, raw, e)))
}

fn parse_u64(key: &str, default: u64) -> Result<u64> {
    match env_var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} must be a non-negative integer, got '{}'", key, raw))),
        None => Ok(default),
    }
}
