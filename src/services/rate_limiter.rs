use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;
use tokio::time::{sleep_until, Instant};

/// Minimum-spacing limiter shared by every task that talks to one upstream.
///
/// Callers reserve the next free slot under the lock, then sleep outside it,
/// so waiting tasks queue up in arrival order without holding the mutex.
#[derive(Debug)]
pub struct SharedRateLimiter {
    /// Earliest instant the next request may start
    next_slot: TokioMutex<Option<Instant>>,
    min_interval: Duration,
}

impl SharedRateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            next_slot: TokioMutex::new(None),
            min_interval,
        }
    }

    /// Wait until this caller may issue a request
    pub async fn enforce_rate_limit(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let slot = {
            let mut next_slot = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next_slot {
                Some(next) if next > now => next,
                _ => now,
            };
            *next_slot = Some(slot + self.min_interval);
            slot
        };

        if slot > Instant::now() {
            sleep_until(slot).await;
        }
    }
}
