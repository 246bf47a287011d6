use chrono::{DateTime, NaiveDate, Utc};

use crate::commands::{block_on, exit_with_error, load_config, open_database};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::models::{Candle, Timeframe};
use crate::services::{CandleQuery, CandleStore, MarketCalendar};

pub fn run(symbol: String, timeframe: &str, limit: Option<u32>, start: Option<String>, end: Option<String>) {
    let timeframe: Timeframe = match timeframe.parse() {
        Ok(tf) => tf,
        Err(e) => exit_with_error("Error parsing timeframe", e),
    };
    let config = load_config();

    let query = match build_query(&config.calendar, limit, start.as_deref(), end.as_deref()) {
        Ok(query) => query,
        Err(e) => exit_with_error("Invalid range", e),
    };

    match block_on(load(&config, &symbol, timeframe, query)) {
        Ok(candles) if candles.is_empty() => {
            println!("⚠️  No {} candles stored for {}", timeframe, symbol);
        }
        Ok(candles) => print_table(&config.calendar, &symbol, timeframe, &candles),
        Err(e) => exit_with_error("Query failed", e),
    }
}

async fn load(config: &AppConfig, symbol: &str, timeframe: Timeframe, query: CandleQuery) -> Result<Vec<Candle>> {
    let db = open_database(config).await?;
    let candles = CandleStore::new(db.pool().clone())
        .range_query(&symbol.to_uppercase(), timeframe, query)
        .await?;
    db.close().await;
    Ok(candles)
}

/// Dates are local market dates; `end` is inclusive of the whole day
fn build_query(
    calendar: &MarketCalendar,
    limit: Option<u32>,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<CandleQuery> {
    let start = start.map(|s| parse_date(s).map(|d| local_midnight(calendar, d))).transpose()?;
    let end = end
        .map(|s| parse_date(s).map(|d| local_midnight(calendar, d + chrono::Duration::days(1)) - chrono::Duration::seconds(1)))
        .transpose()?;
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(AppError::InvalidInput("--start is after --end".to_string()));
        }
    }
    // without any bound, show the most recent rows only
    let limit = match (limit, start, end) {
        (None, None, None) => Some(20),
        (limit, _, _) => limit,
    };
    Ok(CandleQuery { start, end, limit })
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| AppError::InvalidInput(format!("'{}' is not YYYY-MM-DD: {}", raw, e)))
}

fn local_midnight(calendar: &MarketCalendar, date: NaiveDate) -> DateTime<Utc> {
    calendar.at_local(date, chrono::NaiveTime::default())
}

fn print_table(calendar: &MarketCalendar, symbol: &str, timeframe: Timeframe, candles: &[Candle]) {
    println!("🔹 {} {} ({} candles)\n", symbol, timeframe, candles.len());
    println!(
        "{:<17} {:>12} {:>12} {:>12} {:>12} {:>14}",
        "Time", "Open", "High", "Low", "Close", "Volume"
    );
    for candle in candles {
        println!(
            "{:<17} {:>12.2} {:>12.2} {:>12.2} {:>12.2} {:>14}",
            candle.time.with_timezone(&calendar.timezone).format("%Y-%m-%d %H:%M"),
            candle.open,
            candle.high,
            candle.low,
            candle.close,
            crate::utils::format_number(candle.volume as usize)
        );
    }
}
