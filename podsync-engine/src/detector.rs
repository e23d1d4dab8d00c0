//! Remote-change detection.
//!
//! Two triggers, both cheap: a periodic mtime poll while configured, and
//! the host surface's visibility transitions. Regaining foreground checks
//! immediately (polling was suspended in the background); losing it
//! flushes buffered edits without depending on an async completion the
//! host may abandon.

use crate::service::SyncService;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

/// Drives opportunistic remote-change checks for one [`SyncService`].
pub struct ChangeDetector {
    service: Arc<SyncService>,
    poll_abort: Mutex<Option<tokio::task::AbortHandle>>,
}

impl ChangeDetector {
    /// Creates a detector for a service. Call [`start`](Self::start) to
    /// begin polling.
    #[must_use]
    pub fn new(service: Arc<SyncService>) -> Self {
        Self {
            service,
            poll_abort: Mutex::new(None),
        }
    }

    /// Starts the poll loop at the service's configured interval. The
    /// loop no-ops until a pod is configured and survives transient
    /// failures (the next tick retries).
    pub fn start(&self) {
        let service = self.service.clone();
        let period = service.poll_interval();
        let task: JoinHandle<()> = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !service.is_configured() {
                    continue;
                }
                if let Err(e) = service.check_for_remote_change().await {
                    debug!(error = %e, "poll tick failed, retrying next tick");
                }
            }
        });

        let mut slot = self.poll_abort.lock().expect("poll slot poisoned");
        if let Some(previous) = slot.replace(task.abort_handle()) {
            previous.abort();
        }
        // reset() also stops the loop.
        self.service.adopt_task(task);
    }

    /// Stops the poll loop.
    pub fn stop(&self) {
        if let Some(handle) = self.poll_abort.lock().expect("poll slot poisoned").take() {
            handle.abort();
        }
    }

    /// The host surface regained foreground: check immediately instead of
    /// waiting out the poll interval.
    pub async fn on_resume(&self) {
        if !self.service.is_configured() {
            return;
        }
        if let Err(e) = self.service.check_for_remote_change().await {
            debug!(error = %e, "resume check failed");
        }
    }

    /// The host surface is being backgrounded or torn down: flush
    /// buffered edits now. The write is spawned so it proceeds even if
    /// the caller never awaits anything again.
    pub fn on_hidden(&self) {
        let service = self.service.clone();
        tokio::spawn(async move {
            if let Err(e) = service.flush().await {
                debug!(error = %e, "flush on hide failed");
            }
        });
    }
}
