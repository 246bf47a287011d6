use crate::commands::{block_on, exit_with_error, load_config, open_database, yahoo_client};
use crate::config::AppConfig;
use crate::error::Result;
use crate::models::SyncRun;
use crate::services::{FailurePolicy, FundamentalsSync, FundamentalsSyncConfig};

pub fn run(
    force: bool,
    workers: usize,
    symbols: Option<Vec<String>>,
    failure_policy: FailurePolicy,
) {
    let config = load_config();
    let sync_config = FundamentalsSyncConfig {
        symbols,
        workers: workers.max(1),
        force,
        failure_policy,
        fetch_timeout: config.fetch_timeout,
        ..Default::default()
    };

    println!(
        "📑 Syncing fundamentals with {} workers{}",
        sync_config.workers,
        if force { " (forced)" } else { "" }
    );

    let run = match block_on(execute(&config, sync_config)) {
        Ok(run) => run,
        Err(e) => exit_with_error("Fundamentals sync aborted", e),
    };

    println!("\n📊 Fundamentals summary");
    println!("{}", run.format_summary());
    if run.has_failures() {
        println!("\n❌ {} symbol(s) failed", run.failed());
        println!("💡 Re-run with: ztrader fundamentals --force --symbols {}", run.failed_symbols().join(","));
        std::process::exit(1);
    }
    println!("\n✅ Fundamentals up to date");
}

async fn execute(config: &AppConfig, sync_config: FundamentalsSyncConfig) -> Result<SyncRun> {
    let db = open_database(config).await?;
    let sync = FundamentalsSync::new(&db, yahoo_client(config)?, sync_config);
    let run = sync.sync().await?;
    db.close().await;
    Ok(run)
}
