//! # Sync Engine
//!
//! Replays the pending operation queue against the farm API once the device
//! is back online.
//!
//! ## Architecture
//!
//! - **Engine** (this module): the drain loop and failure classification
//! - **Scheduler**: the backoff re-trigger timer
//! - **Network Monitor**: connectivity state and transitions
//! - **Sync State**: phase and status snapshot
//! - **Events**: dead letters, id replacements and finished drains
//!
//! ## Drain Cycle
//!
//! 1. A trigger arriving while a drain runs is coalesced; an offline monitor skips it
//! 2. The queue is read in batches, in drain order
//! 3. Each operation is replayed with known temp ids substituted:
//!    - 2xx: removed, cache refreshed from the response
//!    - permanent failure: dead-lettered, the cycle continues
//!    - transient failure: retried later, or dead-lettered at the retry ceiling
//! 4. A transient failure below the ceiling halts the cycle and schedules a
//!    re-trigger after an exponential delay
//!
//! ## Usage
//!
//! ```rust,no_run
//! use farmsync::sync::{SyncEngine, TriggerReason};
//! use std::sync::Arc;
//!
//! # async fn example(engine: Arc<SyncEngine>) -> farmsync::shared::Result<()> {
//! let report = engine.trigger(TriggerReason::Manual).await?;
//! println!("{:?}: {} applied, {} remaining", report.status, report.applied.len(), report.remaining);
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod network_monitor;
pub mod scheduler;
pub mod sync_state;

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api_client::{classify, ApiTransport, Delivery};
use crate::local_db::LocalDatabase;
use crate::offline::cache::CacheStore;
use crate::offline::queue::{Method, OperationQueue, QueuedOperation};
use crate::offline::reconciliation::{apply_response, record_id, IdMap};
use crate::offline::retry::RetryPolicy;
use crate::shared::config::SyncConfig;
use crate::shared::entity::EntityKind;
use crate::shared::error::{FailureClass, Result, SyncError};

use events::{broadcast_event, SyncEvent, SyncEventBroadcast};
use network_monitor::ConnectivityMonitor;
use scheduler::BackoffScheduler;
pub use sync_state::{DrainStatus, SyncPhase, SyncStatus};

/// Why a drain was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    /// Process start with operations already queued
    Startup,
    /// Offline to online transition
    Reconnect,
    /// `sync_now` or the CLI
    Manual,
    /// The backoff timer fired
    Backoff,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TriggerReason::Startup => "startup",
            TriggerReason::Reconnect => "reconnect",
            TriggerReason::Manual => "manual",
            TriggerReason::Backoff => "backoff",
        };
        f.write_str(name)
    }
}

/// What one trigger did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrainReport {
    pub reason: TriggerReason,
    pub status: DrainStatus,
    /// Operations confirmed by the server, in replay order
    pub applied: Vec<Uuid>,
    pub dead_lettered: Vec<Uuid>,
    /// The operation whose transient failure halted the cycle
    pub halted_on: Option<Uuid>,
    /// Namespaces whose snapshot could not be refreshed, with the reason
    pub cache_refresh_failures: Vec<String>,
    /// Queue rows left after the cycle
    pub remaining: u64,
    /// Delay before the scheduled re-trigger, when halted
    pub next_retry: Option<Duration>,
}

impl DrainReport {
    fn new(reason: TriggerReason, status: DrainStatus) -> Self {
        Self {
            reason,
            status,
            applied: Vec::new(),
            dead_lettered: Vec::new(),
            halted_on: None,
            cache_refresh_failures: Vec::new(),
            remaining: 0,
            next_retry: None,
        }
    }
}

#[derive(Debug, Default)]
struct Health {
    consecutive_failures: u32,
    last_error: Option<String>,
}

enum Flow {
    Continue,
    Halt,
}

/// Drains the operation queue against the API
pub struct SyncEngine {
    db: LocalDatabase,
    queue: Arc<OperationQueue>,
    cache: CacheStore,
    transport: Arc<dyn ApiTransport>,
    monitor: Arc<ConnectivityMonitor>,
    events: SyncEventBroadcast,
    policy: RetryPolicy,
    batch_size: usize,
    drain_guard: Mutex<()>,
    phase: watch::Sender<SyncPhase>,
    backoff: BackoffScheduler,
    health: RwLock<Health>,
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("policy", &self.policy)
            .field("batch_size", &self.batch_size)
            .field("phase", &*self.phase.borrow())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(
        config: &SyncConfig,
        db: LocalDatabase,
        queue: Arc<OperationQueue>,
        transport: Arc<dyn ApiTransport>,
        monitor: Arc<ConnectivityMonitor>,
        events: SyncEventBroadcast,
    ) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            cache: CacheStore::new(db.clone()),
            db,
            queue,
            transport,
            monitor,
            events,
            policy: RetryPolicy::from_config(config),
            batch_size: config.batch_size.max(1),
            drain_guard: Mutex::new(()),
            phase,
            backoff: BackoffScheduler::new(),
            health: RwLock::new(Health::default()),
        }
    }

    /// Replace the retry policy (ceiling and backoff strategy)
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    /// Run one drain cycle now
    ///
    /// API failures never surface here; they end up in the report. Storage
    /// failures abort the cycle and are returned.
    pub async fn trigger(self: &Arc<Self>, reason: TriggerReason) -> Result<DrainReport> {
        let Ok(_guard) = self.drain_guard.try_lock() else {
            tracing::debug!("[Sync] {} trigger coalesced into running drain", reason);
            return Ok(DrainReport::new(reason, DrainStatus::Coalesced));
        };

        if !self.monitor.is_online() {
            tracing::debug!("[Sync] {} trigger skipped while offline", reason);
            return Ok(DrainReport::new(reason, DrainStatus::SkippedOffline));
        }

        if reason != TriggerReason::Backoff && self.backoff.cancel().await {
            tracing::debug!("[Sync] Pending backoff cancelled by {} trigger", reason);
        }

        tracing::info!("[Sync] Drain started ({})", reason);
        self.phase.send_replace(SyncPhase::Draining);

        let mut report = DrainReport::new(reason, DrainStatus::Completed);
        match self.run_cycle(&mut report).await {
            Ok(status) => report.status = status,
            Err(e) => return Err(self.abort_drain(e).await),
        }

        report.remaining = match self.queue.size().await {
            Ok(remaining) => remaining,
            Err(e) => return Err(self.abort_drain(e).await),
        };
        match report.status {
            DrainStatus::Halted => {
                let failures = {
                    let mut health = self.health.write().await;
                    health.consecutive_failures += 1;
                    health.consecutive_failures
                };
                let delay = self.policy.delay_for(failures);
                report.next_retry = Some(delay);

                self.phase.send_replace(SyncPhase::Backoff);
                self.schedule_retrigger(delay).await;
                tracing::warn!(
                    "[Sync] Drain halted after {} halted cycle(s); retrying in {:?}",
                    failures,
                    delay
                );
            }
            _ => {
                {
                    let mut health = self.health.write().await;
                    health.consecutive_failures = 0;
                    health.last_error = None;
                }
                if let Err(e) = self.db.set_last_sync_time().await {
                    return Err(self.abort_drain(e.into()).await);
                }
                self.phase.send_replace(SyncPhase::Idle);
                tracing::info!(
                    "[Sync] Drain completed: {} applied, {} dead-lettered",
                    report.applied.len(),
                    report.dead_lettered.len()
                );
            }
        }

        broadcast_event(
            &self.events,
            SyncEvent::DrainFinished {
                status: report.status,
                applied: report.applied.len(),
                dead_lettered: report.dead_lettered.len(),
                remaining: report.remaining,
            },
        );
        Ok(report)
    }

    /// Trigger on a background task; failures are logged
    pub fn spawn_trigger(self: &Arc<Self>, reason: TriggerReason) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.trigger(reason).await {
                tracing::error!("[Sync] Background {} drain failed: {}", reason, e);
            }
        })
    }

    /// Abort a scheduled backoff re-trigger
    pub async fn cancel_backoff(&self) -> bool {
        let cancelled = self.backoff.cancel().await;
        if cancelled && self.phase() == SyncPhase::Backoff {
            self.phase.send_replace(SyncPhase::Idle);
        }
        cancelled
    }

    /// Time left until the scheduled re-trigger
    pub async fn next_retry_in(&self) -> Option<Duration> {
        self.backoff.time_until_fire().await
    }

    pub async fn status(&self) -> Result<SyncStatus> {
        let health = self.health.read().await;
        let counts = self.queue.refresh_counts().await?;
        Ok(SyncStatus {
            phase: self.phase(),
            last_sync: self.db.get_last_sync_time().await?,
            consecutive_failures: health.consecutive_failures,
            last_error: health.last_error.clone(),
            pending_operations: counts.pending,
            dead_letters: counts.dead_letter,
        })
    }

    async fn schedule_retrigger(self: &Arc<Self>, delay: Duration) {
        let engine = Arc::downgrade(self);
        self.backoff
            .schedule(delay, move || async move {
                if let Some(engine) = engine.upgrade() {
                    engine.spawn_trigger(TriggerReason::Backoff);
                }
            })
            .await;
    }

    /// Storage failure mid-drain: record it and leave the phase Idle
    async fn abort_drain(&self, e: SyncError) -> SyncError {
        tracing::error!("[Sync] Drain aborted by storage failure: {}", e);
        self.health.write().await.last_error = Some(e.to_string());
        self.phase.send_replace(SyncPhase::Idle);
        e
    }

    async fn run_cycle(&self, report: &mut DrainReport) -> Result<DrainStatus> {
        let mut ids = IdMap::load(&self.db).await?;

        loop {
            let batch = self.queue.dequeue_batch(self.batch_size).await?;
            if batch.is_empty() {
                return Ok(DrainStatus::Completed);
            }

            for operation in &batch {
                if let Flow::Halt = self.replay(operation, &mut ids, report).await? {
                    report.halted_on = Some(operation.id);
                    return Ok(DrainStatus::Halted);
                }
            }
        }
    }

    async fn replay(&self, operation: &QueuedOperation, ids: &mut IdMap, report: &mut DrainReport) -> Result<Flow> {
        let request = ids.resolve(operation);
        let delivery = classify(self.transport.send(&request).await);

        match delivery {
            Delivery::Applied(response) => {
                self.queue.remove(operation.id).await?;
                report.applied.push(operation.id);
                tracing::debug!(
                    "[Sync] Applied {} {} -> {}",
                    operation.method,
                    request.path,
                    response.status
                );

                if operation.method == Method::Create {
                    self.record_server_id(operation, response.body.as_ref(), ids).await?;
                }

                if let Err(e) = self.refresh_cache(operation, &request.path, response.body.as_ref()).await {
                    tracing::warn!("[Sync] Cache refresh for {} failed: {}", request.path, e);
                    report.cache_refresh_failures.push(format!("{}: {}", request.path, e));
                }
                Ok(Flow::Continue)
            }
            Delivery::Failed {
                class: FailureClass::Permanent,
                status,
                reason,
            } => {
                self.queue.increment_attempts(operation.id, &reason).await?;
                self.queue
                    .move_to_dead_letter(operation.id, &reason, FailureClass::Permanent, status)
                    .await?;
                report.dead_lettered.push(operation.id);
                Ok(Flow::Continue)
            }
            Delivery::Failed {
                class: FailureClass::Transient,
                status,
                reason,
            } => {
                let attempts = self.queue.increment_attempts(operation.id, &reason).await?;
                tracing::warn!(
                    "[Sync] {} {} failed (attempt {}/{}): {}",
                    operation.method,
                    request.path,
                    attempts,
                    self.policy.max_attempts,
                    reason
                );

                if self.policy.is_exhausted(attempts) {
                    let reason = format!("{} (gave up after {} attempts)", reason, attempts);
                    self.queue
                        .move_to_dead_letter(operation.id, &reason, FailureClass::Transient, status)
                        .await?;
                    report.dead_lettered.push(operation.id);
                    Ok(Flow::Continue)
                } else {
                    self.health.write().await.last_error = Some(reason);
                    Ok(Flow::Halt)
                }
            }
        }
    }

    async fn record_server_id(
        &self,
        operation: &QueuedOperation,
        body: Option<&serde_json::Value>,
        ids: &mut IdMap,
    ) -> Result<()> {
        let (Some(temp_id), Some(server_id)) = (operation.temp_id.as_deref(), body.and_then(record_id)) else {
            return Ok(());
        };

        let namespace = operation.entity().map(|entity| entity.namespace().to_string());
        self.db
            .record_id_mapping(temp_id, &server_id, namespace.as_deref())
            .await?;
        ids.insert(temp_id, server_id.clone());

        tracing::debug!("[Sync] {} is now {}", temp_id, server_id);
        broadcast_event(
            &self.events,
            SyncEvent::IdReplaced {
                temp_id: temp_id.to_string(),
                server_id,
                namespace,
            },
        );
        Ok(())
    }

    /// Fold the server's answer into an existing snapshot of the namespace
    async fn refresh_cache(
        &self,
        operation: &QueuedOperation,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<()> {
        let Some(entity) = EntityKind::from_path(path) else {
            return Ok(());
        };
        let Some(snapshot) = self.cache.read(entity.namespace()).await? else {
            return Ok(());
        };

        if let Some(updated) = apply_response(&snapshot.payload, operation.method, operation.temp_id.as_deref(), path, body) {
            self.cache.write(entity.namespace(), &updated).await?;
        }
        Ok(())
    }
}
