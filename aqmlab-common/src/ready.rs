//! Single-use readiness rendezvous between a spawned remote process and the
//! coordinator waiting on it.
//!
//! The notifier side lives inside the output watcher of a spawned process and
//! fires once when the expected marker appears in the stream. The signal side
//! is owned by the coordinator, which polls it at a bounded interval. Neither
//! side shares mutable state with the other beyond the underlying oneshot
//! channel.

use tokio::sync::oneshot;

/// Creates a connected notifier/signal pair.
pub fn ready_signal() -> (ReadyNotifier, ReadySignal) {
    let (tx, rx) = oneshot::channel();
    (ReadyNotifier { tx: Some(tx) }, ReadySignal { rx, seen: false })
}

/// The producing half: fires at most once.
#[derive(Debug)]
pub struct ReadyNotifier {
    tx: Option<oneshot::Sender<()>>,
}

impl ReadyNotifier {
    /// Signals readiness. Subsequent calls are no-ops.
    pub fn notify(&mut self) {
        if let Some(tx) = self.tx.take() {
            // The receiver may already be gone (e.g. watchdog abort); that is
            // not an error for the notifying side.
            let _ = tx.send(());
        }
    }

    /// Whether [`notify`](Self::notify) has been called.
    pub fn is_notified(&self) -> bool {
        self.tx.is_none()
    }
}

/// The consuming half, owned by the coordinator.
#[derive(Debug)]
pub struct ReadySignal {
    rx: oneshot::Receiver<()>,
    seen: bool,
}

impl ReadySignal {
    /// Non-blocking check; latches once the signal has been observed.
    pub fn try_ready(&mut self) -> bool {
        if self.seen {
            return true;
        }
        if self.rx.try_recv().is_ok() {
            self.seen = true;
        }
        self.seen
    }

    /// Waits for the signal. Returns immediately if it was already observed.
    ///
    /// Resolves even when the notifier is dropped without firing, so a
    /// crashed process cannot block the coordinator forever; callers decide
    /// what a dropped notifier means by re-checking the process handle.
    pub async fn wait(mut self) {
        if self.seen {
            return;
        }
        let _ = (&mut self.rx).await;
        self.seen = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signal_latches_after_notify() {
        let (mut notifier, mut signal) = ready_signal();
        assert!(!signal.try_ready());
        assert!(!notifier.is_notified());

        notifier.notify();
        assert!(notifier.is_notified());
        assert!(signal.try_ready());
        // Latched: stays ready on repeated polls.
        assert!(signal.try_ready());
    }

    #[tokio::test]
    async fn notify_is_idempotent() {
        let (mut notifier, mut signal) = ready_signal();
        notifier.notify();
        notifier.notify();
        assert!(signal.try_ready());
    }

    #[tokio::test]
    async fn wait_resolves_on_dropped_notifier() {
        let (notifier, signal) = ready_signal();
        drop(notifier);
        signal.wait().await;
    }
}
