use std::path::{Path, PathBuf};

use crate::commands::{block_on, exit_with_error, load_config, open_database};
use crate::config::AppConfig;
use crate::error::Result;
use crate::models::Instrument;
use crate::services::{InstrumentRegistry, SeedReport};

pub fn run(file: Option<PathBuf>) {
    let config = load_config();
    let file = file.unwrap_or_else(|| config.instruments_file.clone());
    println!("🌱 Seeding instruments from {}", file.display());

    match block_on(seed(&config, &file)) {
        Ok(report) => {
            println!("✅ Seed complete: {} new, {} updated", report.inserted, report.updated);
        }
        Err(e) => exit_with_error("Seed failed", e),
    }
}

async fn seed(config: &AppConfig, file: &Path) -> Result<SeedReport> {
    let instruments = Instrument::load_file(file)?;
    let nifty_50 = instruments.iter().filter(|i| i.is_nifty_50).count();
    println!("📋 {} instruments in file ({} in NIFTY 50)", instruments.len(), nifty_50);

    let db = open_database(config).await?;
    let registry = InstrumentRegistry::new(db.pool().clone());
    let report = registry.seed(&instruments).await?;
    db.close().await;
    Ok(report)
}
