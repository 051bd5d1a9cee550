//! Retry utility with exponential backoff

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Upper bound for a single backoff delay
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Why a retried operation gave up
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed; holds the last error
    Exhausted(E),
    /// The token fired while waiting between attempts
    Cancelled,
}

/// Retry an async operation with exponential backoff.
///
/// Returns `Ok` on first success, or the last `Err` after all attempts are exhausted.
/// Delays: `initial_delay`, `2 * initial_delay`, `4 * initial_delay`, ... capped at 30s.
/// Cancelling `cancel` cuts the wait between attempts short; an attempt
/// already running is left to finish.
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation_name: &str,
    max_attempts: u32,
    initial_delay: Duration,
    cancel: &CancellationToken,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = initial_delay.min(MAX_BACKOFF);
    let mut last_err = None;

    for attempt in 1..=max_attempts.max(1) {
        match f(attempt).await {
            Ok(val) => return Ok(val),
            Err(e) => {
                warn!(
                    "{} failed (attempt {}/{}): {}",
                    operation_name, attempt, max_attempts, e
                );
                last_err = Some(e);
                if attempt < max_attempts {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = delay.checked_mul(2).unwrap_or(MAX_BACKOFF).min(MAX_BACKOFF);
                }
            }
        }
    }

    match last_err {
        Some(e) => Err(RetryError::Exhausted(e)),
        None => Err(RetryError::Cancelled),
    }
}
