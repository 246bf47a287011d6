use crate::commands::{block_on, exit_with_error, load_config, open_database, yahoo_client};
use crate::config::AppConfig;
use crate::error::Result;
use crate::models::{SyncConfig, SyncMode, SyncRun, Timeframe};
use crate::services::notifier::{dispatch, failure_report};
use crate::services::{DataSync, TelegramNotifier};

/// Parsed `sync` flags
#[derive(Debug, Clone)]
pub struct SyncArgs {
    pub timeframes: String,
    pub full: bool,
    pub force: bool,
    pub workers: usize,
    pub symbols: Option<Vec<String>>,
    pub status_only: bool,
    pub notify: bool,
}

impl SyncArgs {
    pub fn mode(&self) -> SyncMode {
        if self.full {
            SyncMode::Full
        } else if self.force {
            SyncMode::Forced
        } else {
            SyncMode::Incremental
        }
    }
}

pub fn run(args: SyncArgs) {
    let timeframes = match Timeframe::parse_list(&args.timeframes) {
        Ok(timeframes) => timeframes,
        Err(e) => {
            eprintln!("❌ Error parsing timeframes: {}", e);
            eprintln!("   Valid options: all, default, or comma-separated (e.g., 1d,1h,75m)");
            std::process::exit(1);
        }
    };

    if args.status_only {
        super::status::run(&args.timeframes, args.symbols.clone());
        return;
    }

    let config = load_config();
    let mut sync_config = SyncConfig::new(timeframes, args.mode(), args.workers);
    sync_config.fetch_timeout = config.fetch_timeout;
    if let Some(symbols) = args.symbols.clone() {
        sync_config = sync_config.with_symbols(symbols);
    }

    println!(
        "🚀 Starting {} sync: {} with {} workers",
        sync_config.mode,
        sync_config
            .timeframes
            .iter()
            .map(|tf| tf.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        sync_config.workers
    );

    let run = match block_on(execute(&config, sync_config, args.notify)) {
        Ok(run) => run,
        Err(e) => exit_with_error("Sync aborted", e),
    };

    print_summary(&run);
    if run.has_failures() {
        std::process::exit(1);
    }
}

async fn execute(config: &AppConfig, sync_config: SyncConfig, notify: bool) -> Result<SyncRun> {
    let db = open_database(config).await?;
    let fetcher = yahoo_client(config)?;
    let sync = DataSync::new(&db, fetcher, sync_config).with_calendar(config.calendar.clone());
    let run = sync.sync().await?;

    if notify && run.has_failures() {
        match TelegramNotifier::from_config(config)? {
            Some(notifier) => dispatch(&notifier, &failure_report("⚠️ ztrader sync finished with failures", &run)).await,
            None => eprintln!("⚠️  --notify given but TELEGRAM_BOT_TOKEN / TELEGRAM_CHAT_ID are not set"),
        }
    }

    db.close().await;
    Ok(run)
}

fn print_summary(run: &SyncRun) {
    println!("\n📊 Sync summary");
    println!("{}", run.format_summary());

    if run.has_failures() {
        println!("\n❌ {} unit(s) failed after retries", run.failed());
        println!("💡 Re-run the failed set with:");
        println!("   {}", rerun_command(run));
    } else {
        println!("\n✅ Sync completed successfully!");
    }
}

/// Command line that retries exactly the failed symbols and timeframes
pub fn rerun_command(run: &SyncRun) -> String {
    let mut timeframes: Vec<Timeframe> = run.failures().iter().filter_map(|f| f.timeframe).collect();
    timeframes.sort();
    timeframes.dedup();
    let timeframes: Vec<&str> = timeframes.iter().map(|tf| tf.as_str()).collect();

    let mut command = String::from("ztrader sync --force");
    if !timeframes.is_empty() {
        command.push_str(&format!(" --timeframe {}", timeframes.join(",")));
    }
    command.push_str(&format!(" --symbols {}", run.failed_symbols().join(",")));
    command
}
