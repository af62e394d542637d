//! One-shot watchdog deadline for an experiment iteration.
//!
//! The watchdog is armed once, after all client processes have been launched.
//! Work that must complete before the deadline runs under [`Watchdog::guard`];
//! expiry cancels the guarded future at its next suspension point and
//! surfaces [`WatchdogExpired`], after which the coordinator performs its
//! best-effort cleanup.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// The armed deadline expired before the guarded work completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("watchdog deadline expired")]
pub struct WatchdogExpired;

/// A single-use deadline timer.
#[derive(Debug)]
pub struct Watchdog {
    token: CancellationToken,
    timer: tokio::task::JoinHandle<()>,
}

impl Watchdog {
    /// Arms the watchdog: the deadline starts counting now.
    pub fn arm(timeout: Duration) -> Self {
        let token = CancellationToken::new();
        let fired = token.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            tracing::warn!(?timeout, "watchdog deadline expired");
            fired.cancel();
        });
        Self { token, timer }
    }

    /// Whether the deadline has already passed.
    pub fn expired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Runs `fut` until it completes or the deadline fires, whichever comes
    /// first. Cancellation happens at the future's next await point; partial
    /// side effects performed before that point are preserved.
    pub async fn guard<F>(&self, fut: F) -> Result<F::Output, WatchdogExpired>
    where
        F: std::future::Future,
    {
        tokio::select! {
            // Expiry wins over simultaneously-ready work so that an armed
            // deadline is never masked by a future that happens to be ready.
            biased;
            _ = self.token.cancelled() => Err(WatchdogExpired),
            out = fut => Ok(out),
        }
    }

    /// Disarms the watchdog after the guarded phase completed in time.
    pub fn disarm(self) {
        self.timer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn guard_passes_through_fast_work() {
        let watchdog = Watchdog::arm(Duration::from_secs(5));
        let out = watchdog.guard(async { 42 }).await;
        assert_eq!(out, Ok(42));
        assert!(!watchdog.expired());
        watchdog.disarm();
    }

    #[tokio::test(start_paused = true)]
    async fn guard_cancels_slow_work() {
        let watchdog = Watchdog::arm(Duration::from_secs(1));
        let out = watchdog
            .guard(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
            .await;
        assert_eq!(out, Err(WatchdogExpired));
        assert!(watchdog.expired());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_is_observable_after_guard() {
        let watchdog = Watchdog::arm(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(watchdog.expired());
        // A second guarded call fails immediately; the deadline is one-shot.
        let out = watchdog.guard(async { 1 }).await;
        assert_eq!(out, Err(WatchdogExpired));
    }
}
