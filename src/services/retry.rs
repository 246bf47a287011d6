use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::models::RetryPolicy;
use crate::services::market_data::FetchError;

/// Run `op` until it succeeds, fails permanently, or the policy runs out.
///
/// Each attempt is bounded by `attempt_timeout`; an elapsed timeout counts as a
/// transient `FetchError::Timeout`. Returns the final result and the number of
/// attempts made.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    attempt_timeout: Duration,
    label: &str,
    mut op: F,
) -> (Result<T, FetchError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let result = match tokio::time::timeout(attempt_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(attempt_timeout)),
        };

        match result {
            Ok(value) => return (Ok(value), attempt),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    unit = label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient fetch failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return (Err(err), attempt),
        }
    }
}
