use chrono::{DateTime, Utc};

use crate::commands::{block_on, exit_with_error, load_config, open_database};
use crate::config::AppConfig;
use crate::error::Result;
use crate::models::Timeframe;
use crate::services::{MarketCalendar, StatusReporter, UnitStatus};
use crate::utils::format_number;

pub fn run(timeframes: &str, symbols: Option<Vec<String>>) {
    let timeframes = match Timeframe::parse_list(timeframes) {
        Ok(timeframes) => timeframes,
        Err(e) => exit_with_error("Error parsing timeframes", e),
    };

    println!("📊 Candle Store Status\n");
    let config = load_config();
    if let Err(e) = block_on(show_status(&config, timeframes, symbols)) {
        exit_with_error("Error", e);
    }
}

async fn show_status(config: &AppConfig, timeframes: Vec<Timeframe>, symbols: Option<Vec<String>>) -> Result<()> {
    let db = open_database(config).await?;
    let reporter = StatusReporter::new(&db).with_calendar(config.calendar.clone());

    let symbols = reporter.resolve_symbols(symbols.as_deref()).await?;
    if symbols.is_empty() {
        println!("⚠️  No instruments registered. Run 'seed' first.");
        return Ok(());
    }

    let report = reporter.report(&symbols, &timeframes).await?;
    println!(
        "📈 {} instruments × {} timeframes, reference date {} (schema v{})\n",
        symbols.len(),
        timeframes.len(),
        reporter.calendar().reference_date(reporter.now()),
        db.schema_version().await?.unwrap_or_else(|| "?".to_string())
    );
    println!(
        "{:<16} {:>4} {:>10}  {:<10}  {:<17} {:>10}  State",
        "Symbol", "TF", "Candles", "Since", "Latest", "Age"
    );
    println!("═══════════════════════════════════════════════════════════════════════════════════════");
    let calendar = reporter.calendar();
    for unit in &report {
        print_row(calendar, unit);
    }

    let up_to_date = report.iter().filter(|u| u.up_to_date).count();
    let empty = report.iter().filter(|u| u.latest.is_none()).count();
    let total_candles: usize = report.iter().map(|u| u.count).sum();
    println!("═══════════════════════════════════════════════════════════════════════════════════════");
    println!(
        "✅ {} up to date | 🔄 {} due | ❌ {} empty | {} candles stored",
        up_to_date,
        report.len() - up_to_date - empty,
        empty,
        format_number(total_candles)
    );

    db.close().await;
    Ok(())
}

fn local_time(calendar: &MarketCalendar, time: Option<DateTime<Utc>>, format: &str) -> String {
    match time {
        Some(time) => time.with_timezone(&calendar.timezone).format(format).to_string(),
        None => "-".to_string(),
    }
}

fn print_row(calendar: &MarketCalendar, unit: &UnitStatus) {
    println!(
        "{:<16} {:>4} {:>10}  {:<10}  {:<17} {:>10}  {}",
        unit.symbol,
        unit.timeframe.as_str(),
        format_number(unit.count),
        local_time(calendar, unit.earliest, "%Y-%m-%d"),
        local_time(calendar, unit.latest, "%Y-%m-%d %H:%M"),
        unit.age.map(format_age).unwrap_or_else(|| "-".to_string()),
        state_label(unit)
    );
}

fn state_label(unit: &UnitStatus) -> &'static str {
    match (unit.latest.is_some(), unit.up_to_date, unit.stale) {
        (false, _, _) => "❌ empty",
        (true, true, _) => "✅ fresh",
        (true, false, false) => "🔄 due",
        (true, false, true) => "⚠️  stale",
    }
}

fn format_age(age: chrono::Duration) -> String {
    let minutes = age.num_minutes().max(0);
    if minutes < 60 {
        format!("{}m", minutes)
    } else if minutes < 48 * 60 {
        format!("{}h {:02}m", minutes / 60, minutes % 60)
    } else {
        format!("{}d", minutes / (24 * 60))
    }
}
