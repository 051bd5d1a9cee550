//! Cooperative shutdown
//!
//! The client never aborts I/O in flight. Instead it asks [`Shutdown::check`]
//! at every state boundary whether it should stop, which happens when the
//! cancellation token fires or the optional run budget (`loop_lapse`) runs out.

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Why a run stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The cancellation token fired (e.g. SIGTERM)
    Cancelled,
    /// The overall time budget ran out
    LapseExpired,
}

/// Cancellation token plus optional deadline, checked at state boundaries
#[derive(Debug, Clone)]
pub struct Shutdown {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Shutdown {
    /// Budget starts counting now. A budget too large to represent never
    /// expires.
    pub fn new(token: CancellationToken, lapse: Option<Duration>) -> Self {
        Self {
            token,
            deadline: lapse.and_then(|l| Instant::now().checked_add(l)),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Non-blocking check; cancellation takes precedence over the deadline.
    pub fn check(&self) -> Option<StopReason> {
        if self.token.is_cancelled() {
            return Some(StopReason::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(StopReason::LapseExpired),
            _ => None,
        }
    }

    /// Sleep for `period`, waking early if shutdown is requested or the
    /// deadline passes.
    pub async fn sleep(&self, period: Duration) -> Option<StopReason> {
        if let Some(reason) = self.check() {
            return Some(reason);
        }
        let wake = Instant::now().checked_add(period);
        let until = match (self.deadline, wake) {
            (Some(deadline), Some(wake)) => Some(deadline.min(wake)),
            (deadline, wake) => deadline.or(wake),
        };
        match until {
            Some(until) => tokio::select! {
                _ = self.token.cancelled() => Some(StopReason::Cancelled),
                _ = tokio::time::sleep_until(until) => self.check(),
            },
            // Unbounded pause: only cancellation ends it
            None => {
                self.token.cancelled().await;
                Some(StopReason::Cancelled)
            }
        }
    }
}

/// Cancel `token` on SIGINT or SIGTERM.
///
/// Spawns a background task; the returned token is the one passed in.
pub fn cancel_on_signal(token: CancellationToken) -> CancellationToken {
    let trigger = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("received shutdown alert; stopping at next boundary");
        trigger.cancel();
    });
    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_check_idle() {
        let shutdown = Shutdown::new(CancellationToken::new(), None);
        assert_eq!(shutdown.check(), None);
    }

    #[tokio::test]
    async fn test_check_cancelled() {
        let token = CancellationToken::new();
        let shutdown = Shutdown::new(token.clone(), Some(Duration::from_secs(3600)));
        token.cancel();
        assert_eq!(shutdown.check(), Some(StopReason::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lapse_expires() {
        let shutdown = Shutdown::new(CancellationToken::new(), Some(Duration::from_secs(10)));
        assert_eq!(shutdown.sleep(Duration::from_secs(4)).await, None);
        assert_eq!(
            shutdown.sleep(Duration::from_secs(60)).await,
            Some(StopReason::LapseExpired)
        );
        assert_eq!(shutdown.check(), Some(StopReason::LapseExpired));
    }

    #[tokio::test]
    async fn test_huge_lapse_never_expires() {
        let shutdown = Shutdown::new(CancellationToken::new(), Some(Duration::MAX));
        assert_eq!(shutdown.check(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_period_stops_at_deadline() {
        let shutdown = Shutdown::new(CancellationToken::new(), Some(Duration::from_secs(5)));
        assert_eq!(
            shutdown.sleep(Duration::MAX).await,
            Some(StopReason::LapseExpired)
        );
    }

    #[tokio::test]
    async fn test_huge_period_wakes_on_cancel() {
        let token = CancellationToken::new();
        let shutdown = Shutdown::new(token.clone(), None);
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        assert_eq!(
            shutdown.sleep(Duration::MAX).await,
            Some(StopReason::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_sleep_wakes_on_cancel() {
        let token = CancellationToken::new();
        let shutdown = Shutdown::new(token.clone(), None);
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let reason = shutdown.sleep(Duration::from_secs(3600)).await;
        assert_eq!(reason, Some(StopReason::Cancelled));
    }
}
