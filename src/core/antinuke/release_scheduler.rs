// Auto-release timers.
//
// Each armed timer gets a ReleaseToken. The token is stored in the QuarantineRecord,
// so a manual release can cancel the timer explicitly. A timer that already fired
// and is mid-release cannot be cancelled; the controller treats it as a no-op
// through its "no record" guard and by comparing token ids.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Handle to one armed auto-release timer.
#[derive(Debug, Clone)]
pub struct ReleaseToken {
    id: u64,
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl ReleaseToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancel the timer. Safe to call more than once, and after it fired.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }
}

/// Arms cancellable one-shot timers on the tokio runtime.
#[derive(Debug)]
pub struct ReleaseScheduler {
    next_id: AtomicU64,
}

impl Default for ReleaseScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ReleaseScheduler {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Run `on_fire` after `delay` unless the returned token is cancelled first.
    pub fn arm<F, Fut>(&self, delay: Duration, on_fire: F) -> ReleaseToken
    where
        F: FnOnce(ReleaseToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let token = ReleaseToken {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            cancel_tx: Arc::new(cancel_tx),
        };

        let fired = token.clone();
        tokio::spawn(async move {
            // The watch::Ref from wait_for must not live across the on_fire await.
            let expired = tokio::select! {
                _ = async { let _ = cancel_rx.wait_for(|cancelled| *cancelled).await; } => false,
                _ = tokio::time::sleep(delay) => true,
            };

            if expired && !fired.is_cancelled() {
                on_fire(fired).await;
            } else {
                tracing::debug!(token = fired.id(), "Auto-release timer cancelled");
            }
        });

        token
    }
}
