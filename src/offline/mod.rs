//! # Offline Sync
//!
//! The read/write facade feature components use to keep working without a
//! connection.
//!
//! ## Architecture
//!
//! - **Cache Store**: last known-good entity snapshots for offline reads
//! - **Operation Queue**: durable list of unconfirmed mutations
//! - **Optimistic Records**: placeholder ids and synthetic records for the UI
//! - **Reconciliation**: folds server responses back into the cache
//! - **Retry Logic**: retry ceiling and backoff for the sync engine
//!
//! ## Key Components
//!
//! - `cache.rs`: snapshot store
//! - `queue.rs`: operation queue and dead letters
//! - `optimistic.rs`: temp ids and optimistic records
//! - `reconciliation.rs`: temp id substitution and snapshot refresh
//! - `retry.rs`: retry policy and backoff strategies
//!
//! ## Usage
//!
//! ```rust,no_run
//! use farmsync::offline::queue::{Method, Priority};
//! use farmsync::offline::OfflineSync;
//! use farmsync::shared::SyncConfig;
//! use serde_json::json;
//!
//! # async fn example() -> farmsync::shared::Result<()> {
//! let sync = OfflineSync::open(SyncConfig::from_env()?).await?;
//! sync.init_offline_sync().await?;
//!
//! // Offline write: queued and replayed on reconnect
//! let op = sync
//!     .queue_api_call("/pens", Method::Create, Some(json!({"name": "East"})), Priority::High)
//!     .await?;
//! println!("queued with placeholder id {:?}", op.temp_id);
//!
//! // Offline read
//! let pens = sync.get_cached_data().pens().await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod optimistic;
pub mod queue;
pub mod reconciliation;
pub mod retry;

// Re-export main types
pub use cache::{CacheStore, CachedSnapshot};
pub use optimistic::{new_temp_id, optimistic_record};
pub use queue::{DeadLetter, Method, NewOperation, OperationQueue, Priority, QueueCounts, QueuedOperation};
pub use retry::{BackoffStrategy, RetryPolicy};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api_client::{classify, ApiRequest, ApiTransport, Delivery, HttpTransport};
use crate::local_db::LocalDatabase;
use crate::shared::config::SyncConfig;
use crate::shared::entity::EntityKind;
use crate::shared::error::{FailureClass, Result, SyncError};
use crate::sync::events::{event_channel, SyncEvent, SyncEventBroadcast};
use crate::sync::network_monitor::{Connectivity, ConnectivityMonitor};
use crate::sync::{DrainReport, SyncEngine, SyncStatus, TriggerReason};

/// Where the data returned by [`OfflineSync::fetch`] came from
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DataSource {
    /// Fresh from the server (and written through to the cache)
    Live,
    /// The cached snapshot
    Cache { stored_at: DateTime<Utc> },
    /// Neither the server nor the cache had anything
    Empty,
}

/// Result of a read
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fetched {
    pub data: Value,
    pub source: DataSource,
}

/// Result of a write
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// The server accepted the write directly
    Applied { response: Option<Value> },
    /// The write was queued; show `optimistic` until it is confirmed
    Queued {
        operation: QueuedOperation,
        optimistic: Option<Value>,
    },
}

/// Offline read/write facade
///
/// Owns the cache, the queue, the connectivity monitor and the sync engine.
pub struct OfflineSync {
    cache: CacheStore,
    queue: Arc<OperationQueue>,
    monitor: Arc<ConnectivityMonitor>,
    transport: Arc<dyn ApiTransport>,
    engine: Arc<SyncEngine>,
    events: SyncEventBroadcast,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl OfflineSync {
    /// Open the configured database and talk HTTP to the configured API
    ///
    /// The monitor starts online; the host reports changes with
    /// [`OfflineSync::set_online`].
    pub async fn open(config: SyncConfig) -> Result<Self> {
        let db = LocalDatabase::connect(&config.database).await?;
        let transport = Arc::new(HttpTransport::new(&config));
        let monitor = Arc::new(ConnectivityMonitor::new(Connectivity::Online));
        Self::with_parts(&config, db, transport, monitor).await
    }

    /// Assemble the facade from explicit parts
    pub async fn with_parts(
        config: &SyncConfig,
        db: LocalDatabase,
        transport: Arc<dyn ApiTransport>,
        monitor: Arc<ConnectivityMonitor>,
    ) -> Result<Self> {
        let events = event_channel(config.event_capacity);
        let queue = Arc::new(OperationQueue::open(db.clone(), events.clone()).await?);
        let engine = Arc::new(SyncEngine::new(
            config,
            db.clone(),
            Arc::clone(&queue),
            Arc::clone(&transport),
            Arc::clone(&monitor),
            events.clone(),
        ));

        Ok(Self {
            cache: CacheStore::new(db),
            queue,
            monitor,
            transport,
            engine,
            events,
            listener: Mutex::new(None),
        })
    }

    /// Wire connectivity transitions to the sync engine
    ///
    /// Idempotent: a second call while the listener runs does nothing. When
    /// online with operations pending, an initial drain runs before returning.
    pub async fn init_offline_sync(&self) -> Result<Option<DrainReport>> {
        {
            let mut listener = self.listener.lock().await;
            if listener.as_ref().is_some_and(|handle| !handle.is_finished()) {
                tracing::debug!("[Sync] Offline sync already initialized");
                return Ok(None);
            }

            let mut subscription = self.monitor.subscribe();
            let engine = Arc::clone(&self.engine);
            *listener = Some(tokio::spawn(async move {
                while let Some(state) = subscription.recv().await {
                    if !state.is_online() {
                        continue;
                    }
                    if let Err(e) = engine.trigger(TriggerReason::Reconnect).await {
                        tracing::error!("[Sync] Reconnect drain failed: {}", e);
                    }
                }
            }));
            tracing::info!("[Sync] Offline sync initialized");
        }

        if self.monitor.is_online() && self.queue.size().await? > 0 {
            return Ok(Some(self.engine.trigger(TriggerReason::Startup).await?));
        }
        Ok(None)
    }

    /// Stop reacting to transitions and cancel any pending backoff
    ///
    /// Returns whether a listener was running.
    pub async fn teardown(&self) -> bool {
        let was_running = match self.listener.lock().await.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        };
        self.engine.cancel_backoff().await;
        if was_running {
            tracing::info!("[Sync] Offline sync torn down");
        }
        was_running
    }

    /// Whether the transition listener is running
    pub async fn is_initialized(&self) -> bool {
        self.listener
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Drain the queue now
    pub async fn sync_now(&self) -> Result<DrainReport> {
        self.engine.trigger(TriggerReason::Manual).await
    }

    /// Queue a mutation for replay
    ///
    /// Creates get a placeholder id, returned as `temp_id` on the operation.
    pub async fn queue_api_call(
        &self,
        path: &str,
        method: Method,
        body: Option<Value>,
        priority: Priority,
    ) -> Result<QueuedOperation> {
        let mut operation = NewOperation::new(method, path).maybe_body(body).priority(priority);
        if method == Method::Create {
            operation = operation.temp_id(new_temp_id());
        }
        self.queue.enqueue(operation).await
    }

    /// Write now if possible, queue otherwise
    ///
    /// Online, the call goes straight to the server; a transient failure falls
    /// back to the queue. A permanent failure is the caller's to handle and is
    /// returned as [`SyncError::Permanent`].
    pub async fn mutate(
        &self,
        path: &str,
        method: Method,
        body: Option<Value>,
        priority: Priority,
    ) -> Result<MutationOutcome> {
        if !path.starts_with('/') {
            return Err(SyncError::invalid("path", format!("'{}' must start with '/'", path)));
        }

        if self.monitor.is_online() {
            let request = ApiRequest {
                verb: method.verb(),
                path: path.to_string(),
                body: if method == Method::Delete { None } else { body.clone() },
            };

            match classify(self.transport.send(&request).await) {
                Delivery::Applied(response) => {
                    // The server already has the write; a stale snapshot is not a failure
                    if let Err(e) = self.refresh_after_write(method, path, response.body.as_ref()).await {
                        tracing::warn!("[Cache] Refresh after {} {} failed: {}", method, path, e);
                    }
                    return Ok(MutationOutcome::Applied { response: response.body });
                }
                Delivery::Failed {
                    class: FailureClass::Permanent,
                    status,
                    reason,
                } => return Err(SyncError::permanent(status, reason)),
                Delivery::Failed { reason, .. } => {
                    tracing::info!("[Sync] Direct {} {} failed, queueing: {}", method, path, reason);
                }
            }
        }

        let operation = self.queue_api_call(path, method, body, priority).await?;
        let optimistic = optimistic_record(&operation);
        Ok(MutationOutcome::Queued { operation, optimistic })
    }

    /// Read live when possible, cached otherwise
    ///
    /// A successful live read replaces the entity's snapshot.
    pub async fn fetch(&self, entity: EntityKind, path: &str) -> Result<Fetched> {
        if self.monitor.is_online() {
            match classify(self.transport.send(&ApiRequest::get(path)).await) {
                Delivery::Applied(response) => {
                    let data = response.body.unwrap_or_else(|| Value::Array(Vec::new()));
                    self.cache.write(entity.namespace(), &data).await?;
                    return Ok(Fetched {
                        data,
                        source: DataSource::Live,
                    });
                }
                Delivery::Failed { reason, .. } => {
                    tracing::info!("[Cache] Live read of {} failed, using cache: {}", path, reason);
                }
            }
        }

        Ok(match self.cache.read(entity.namespace()).await? {
            Some(snapshot) => Fetched {
                data: snapshot.payload,
                source: DataSource::Cache {
                    stored_at: snapshot.stored_at,
                },
            },
            None => Fetched {
                data: Value::Array(Vec::new()),
                source: DataSource::Empty,
            },
        })
    }

    /// Per-entity snapshot writers
    pub fn cache_data(&self) -> CacheWriter<'_> {
        CacheWriter { cache: &self.cache }
    }

    /// Per-entity snapshot readers; a missing snapshot reads as `[]`
    pub fn get_cached_data(&self) -> CacheReader<'_> {
        CacheReader { cache: &self.cache }
    }

    /// Drop every cached snapshot (logout); the queue is kept
    pub async fn clear_cache(&self) -> Result<u64> {
        self.cache.clear(None).await
    }

    pub async fn pending_count(&self) -> Result<u64> {
        self.queue.size().await
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        self.queue.dead_letters().await
    }

    /// Give a dead letter another chance at the tail of the queue
    pub async fn retry_dead_letter(&self, id: Uuid) -> Result<QueuedOperation> {
        self.queue.requeue_dead_letter(id).await
    }

    pub async fn discard_dead_letter(&self, id: Uuid) -> Result<()> {
        self.queue.discard_dead_letter(id).await
    }

    /// Pending / dead-letter counts for badges
    pub fn subscribe_counts(&self) -> watch::Receiver<QueueCounts> {
        self.queue.subscribe_counts()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Report the platform's connectivity signal
    pub fn set_online(&self, online: bool) -> bool {
        self.monitor.set_online(online)
    }

    pub fn is_online(&self) -> bool {
        self.monitor.is_online()
    }

    /// Use `token` for every following request, direct or replayed
    pub async fn set_auth_token(&self, token: Option<String>) {
        self.transport.set_bearer_token(token).await;
    }

    pub async fn status(&self) -> Result<SyncStatus> {
        self.engine.status().await
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.queue
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    async fn refresh_after_write(&self, method: Method, path: &str, body: Option<&Value>) -> Result<()> {
        let Some(entity) = EntityKind::from_path(path) else {
            return Ok(());
        };
        let Some(snapshot) = self.cache.read(entity.namespace()).await? else {
            return Ok(());
        };
        if let Some(updated) = reconciliation::apply_response(&snapshot.payload, method, None, path, body) {
            self.cache.write(entity.namespace(), &updated).await?;
        }
        Ok(())
    }
}

impl Drop for OfflineSync {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

/// Snapshot writers returned by [`OfflineSync::cache_data`]
#[derive(Debug, Clone, Copy)]
pub struct CacheWriter<'a> {
    cache: &'a CacheStore,
}

impl CacheWriter<'_> {
    pub async fn entity(&self, entity: EntityKind, payload: &Value) -> Result<CachedSnapshot> {
        self.cache.write(entity.namespace(), payload).await
    }
}

/// Snapshot readers returned by [`OfflineSync::get_cached_data`]
#[derive(Debug, Clone, Copy)]
pub struct CacheReader<'a> {
    cache: &'a CacheStore,
}

impl CacheReader<'_> {
    pub async fn entity(&self, entity: EntityKind) -> Result<Value> {
        Ok(self
            .cache
            .read(entity.namespace())
            .await?
            .map(|snapshot| snapshot.payload)
            .unwrap_or_else(|| Value::Array(Vec::new())))
    }
}

macro_rules! entity_accessors {
    ($($name:ident => $kind:ident),* $(,)?) => {
        impl CacheWriter<'_> {
            $(
                #[doc = concat!("Replace the `", stringify!($name), "` snapshot")]
                pub async fn $name(&self, payload: &Value) -> Result<CachedSnapshot> {
                    self.entity(EntityKind::$kind, payload).await
                }
            )*
        }

        impl CacheReader<'_> {
            $(
                #[doc = concat!("Cached `", stringify!($name), "`, or `[]`")]
                pub async fn $name(&self) -> Result<Value> {
                    self.entity(EntityKind::$kind).await
                }
            )*
        }
    };
}

entity_accessors! {
    tasks => Tasks,
    events => Events,
    livestock => Livestock,
    pens => Pens,
    users => Users,
    weight_records => WeightRecords,
    breeding_events => BreedingEvents,
    notifications => Notifications,
    investors => Investors,
}
