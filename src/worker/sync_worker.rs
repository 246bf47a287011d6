use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use crate::constants::watch::{IDLE_INTERVAL_SECS, SESSION_INTERVAL_SECS};
use crate::services::DataSync;

/// Sleep between passes, picked by whether the session is open
#[derive(Debug, Clone, Copy)]
pub struct WatchIntervals {
    pub session: Duration,
    pub idle: Duration,
}

impl Default for WatchIntervals {
    fn default() -> Self {
        Self {
            session: Duration::from_secs(SESSION_INTERVAL_SECS),
            idle: Duration::from_secs(IDLE_INTERVAL_SECS),
        }
    }
}

/// Run incremental syncs forever. A failed pass is logged and the loop goes on.
pub async fn run(sync: DataSync, intervals: WatchIntervals) {
    run_passes(&sync, intervals, None).await;
}

/// Like `run`, stopping after `max_passes` when given. Returns the passes made.
#[instrument(skip(sync))]
pub async fn run_passes(sync: &DataSync, intervals: WatchIntervals, max_passes: Option<u64>) -> u64 {
    info!(
        session_secs = intervals.session.as_secs(),
        idle_secs = intervals.idle.as_secs(),
        "Starting sync worker"
    );

    let mut iteration = 0u64;
    loop {
        iteration += 1;
        let pass_start = Instant::now();
        let session_open = sync.calendar().is_session_open(sync.now());
        info!(iteration, session_open, "Sync worker: starting pass");

        match sync.sync().await {
            Ok(run) if run.has_failures() => {
                warn!(
                    iteration,
                    succeeded = run.succeeded(),
                    skipped = run.skipped(),
                    failed = run.failed(),
                    failed_symbols = %run.failed_symbols().join(","),
                    "Sync worker: pass finished with failures"
                );
            }
            Ok(run) => {
                info!(
                    iteration,
                    succeeded = run.succeeded(),
                    skipped = run.skipped(),
                    inserted = run.total_inserted(),
                    "Sync worker: pass completed"
                );
            }
            Err(e) => {
                error!(iteration, error = %e, "Sync worker: pass aborted");
            }
        }

        if max_passes.is_some_and(|max| iteration >= max) {
            return iteration;
        }

        let interval = sync.calendar().sync_interval(sync.now(), intervals.session, intervals.idle);
        info!(
            iteration,
            pass_secs = pass_start.elapsed().as_secs_f64(),
            next_in_secs = interval.as_secs(),
            "Sync worker: sleeping"
        );
        sleep(interval).await;
    }
}
