use crate::commands::{block_on, exit_with_error, load_config, open_database, yahoo_client};
use crate::models::{SyncConfig, SyncMode, Timeframe};
use crate::services::DataSync;
use crate::worker::{run_sync_worker, WatchIntervals};

pub fn run(timeframes: &str, workers: usize) {
    let timeframes = match Timeframe::parse_list(timeframes) {
        Ok(timeframes) => timeframes,
        Err(e) => exit_with_error("Error parsing timeframes", e),
    };
    let config = load_config();
    let intervals = WatchIntervals::default();

    println!(
        "👀 Watching {} timeframes with {} workers (every {}m in session, {}m otherwise)",
        timeframes.len(),
        workers,
        intervals.session.as_secs() / 60,
        intervals.idle.as_secs() / 60
    );

    block_on(async {
        let db = match open_database(&config).await {
            Ok(db) => db,
            Err(e) => exit_with_error("Startup failed", e),
        };
        let fetcher = match yahoo_client(&config) {
            Ok(fetcher) => fetcher,
            Err(e) => exit_with_error("Startup failed", e),
        };

        let mut sync_config = SyncConfig::new(timeframes, SyncMode::Incremental, workers);
        sync_config.fetch_timeout = config.fetch_timeout;
        let sync = DataSync::new(&db, fetcher, sync_config).with_calendar(config.calendar.clone());

        tokio::select! {
            _ = run_sync_worker(sync, intervals) => {}
            _ = tokio::signal::ctrl_c() => {
                println!("\n🛑 Stopping watch");
            }
        }
        db.close().await;
    });
}
