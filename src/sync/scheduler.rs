//! # Backoff Scheduler
//!
//! Holds the single pending re-trigger timer of the sync engine. Scheduling a
//! new timer replaces the old one; cancelling aborts it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug)]
struct PendingTimer {
    handle: JoinHandle<()>,
    due: Instant,
}

/// Backoff timer slot
#[derive(Debug, Default)]
pub struct BackoffScheduler {
    pending: Arc<Mutex<Option<PendingTimer>>>,
}

impl BackoffScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fire` after `delay`, replacing any timer already pending
    ///
    /// The timer clears its own slot before calling `fire`, so `fire` may
    /// schedule the next timer.
    pub async fn schedule<F, Fut>(&self, delay: Duration, fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut pending = self.pending.lock().await;
        if let Some(previous) = pending.take() {
            previous.handle.abort();
        }

        let slot = Arc::clone(&self.pending);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            slot.lock().await.take();
            fire().await;
        });

        tracing::debug!("[Sync] Re-trigger scheduled in {:?}", delay);
        *pending = Some(PendingTimer {
            handle,
            due: Instant::now() + delay,
        });
    }

    /// Abort the pending timer; returns whether one was pending
    pub async fn cancel(&self) -> bool {
        match self.pending.lock().await.take() {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Time left until the pending timer fires
    pub async fn time_until_fire(&self) -> Option<Duration> {
        self.pending
            .lock()
            .await
            .as_ref()
            .map(|timer| timer.due.saturating_duration_since(Instant::now()))
    }
}
