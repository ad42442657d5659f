//! Scoped start/stop control for long-running loops.
//!
//! A [`ShutdownToken`] is created by whoever owns the process lifecycle and
//! cloned into every loop that must stop with it. There is no process-wide
//! state: two tokens never affect each other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Default)]
struct Shared {
    stopped: AtomicBool,
    notify: Notify,
}

/// A cloneable stop signal.
///
/// Clones share the same signal; cancelling any of them stops all.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    shared: Arc<Shared>,
}

impl ShutdownToken {
    /// Create a new, running token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal every holder to stop.
    pub fn cancel(&self) {
        if !self.shared.stopped.swap(true, Ordering::SeqCst) {
            debug!("Shutdown requested");
        }
        self.shared.notify.notify_waiters();
    }

    /// Check if the stop signal has been sent.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// Wait until the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a cancel in between is seen.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Sleep for `duration`, waking early on cancellation.
    ///
    /// Returns `true` if the full duration elapsed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(duration) => !self.is_cancelled(),
            () = self.cancelled() => false,
        }
    }

    /// Idle in fixed intervals until cancelled.
    pub async fn idle(&self, interval: Duration) {
        while self.sleep(interval).await {
            trace!(interval_ms = interval.as_millis(), "Idle");
        }
    }

    /// Cancel this token when the process receives Ctrl-C.
    pub fn cancel_on_ctrl_c(&self) {
        let token = self.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupted, shutting down");
                    token.cancel();
                }
                Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C"),
            }
        });
    }
}
