//! # Pending Operation Queue
//!
//! Durable, ordered list of mutating API calls the server has not confirmed
//! yet, plus the dead-letter list of calls that will not be retried.
//!
//! ## Features
//!
//! - **Persistent Queue**: operations survive app restarts (SQLite)
//! - **Priority Tiers**: `High` drains before `Normal` before `Low`, FIFO within a tier
//! - **Dead Letters**: failed operations are moved aside with a reason, never dropped
//! - **Corruption Tolerance**: an undecodable row is skipped and reported, not fatal
//! - **Badge Counts**: a `watch` channel of pending / dead-letter counts
//!
//! ## Usage
//!
//! ```rust,no_run
//! use farmsync::local_db::LocalDatabase;
//! use farmsync::offline::queue::{Method, NewOperation, OperationQueue, Priority};
//! use farmsync::sync::events::event_channel;
//! use serde_json::json;
//!
//! # async fn example() -> farmsync::shared::Result<()> {
//! let db = LocalDatabase::in_memory().await?;
//! let queue = OperationQueue::open(db, event_channel(16)).await?;
//!
//! queue
//!     .enqueue(
//!         NewOperation::new(Method::Update, "/pens/5")
//!             .body(json!({"name": "North"}))
//!             .priority(Priority::Normal),
//!     )
//!     .await?;
//!
//! for op in queue.dequeue_batch(10).await? {
//!     // replay...
//!     queue.remove(op.id).await?;
//! }
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use crate::api_client::{ApiRequest, Verb};
use crate::local_db::sync::{DeadLetterRow, OperationRow};
use crate::local_db::LocalDatabase;
use crate::shared::entity::EntityKind;
use crate::shared::error::{FailureClass, Result, SyncError};
use crate::sync::events::{broadcast_event, SyncEvent, SyncEventBroadcast};

/// Kind of mutation, mapped onto an HTTP verb at replay time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Create,
    Update,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Create => "create",
            Method::Update => "update",
            Method::Delete => "delete",
        }
    }

    pub fn verb(&self) -> Verb {
        match self {
            Method::Create => Verb::Post,
            Method::Update => Verb::Put,
            Method::Delete => Verb::Delete,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = SyncError;

    /// Accepts the stored names and the HTTP verbs they map to
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" | "post" => Ok(Method::Create),
            "update" | "put" | "patch" => Ok(Method::Update),
            "delete" => Ok(Method::Delete),
            other => Err(SyncError::invalid("method", format!("unknown method '{}'", other))),
        }
    }
}

/// Drain tier; variants are declared in drain order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(SyncError::invalid("priority", format!("unknown priority '{}'", other))),
        }
    }
}

/// An operation about to be queued
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub priority: Priority,
    /// Placeholder id handed to the UI for an optimistic create
    pub temp_id: Option<String>,
}

impl NewOperation {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            priority: Priority::default(),
            temp_id: None,
        }
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn maybe_body(mut self, body: Option<Value>) -> Self {
        self.body = body;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn temp_id(mut self, temp_id: impl Into<String>) -> Self {
        self.temp_id = Some(temp_id.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if !self.path.starts_with('/') {
            return Err(SyncError::invalid("path", format!("'{}' must start with '/'", self.path)));
        }
        if self.path.chars().any(char::is_whitespace) {
            return Err(SyncError::invalid("path", "must not contain whitespace"));
        }
        Ok(())
    }
}

/// A mutation waiting for server confirmation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// UUIDv7, ordered by creation time
    pub id: Uuid,
    /// Insertion sequence; FIFO order within a priority tier
    pub seq: i64,
    pub method: Method,
    pub path: String,
    /// Always `None` for `Delete`
    pub body: Option<Value>,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    pub temp_id: Option<String>,
    pub last_error: Option<String>,
}

impl QueuedOperation {
    /// Entity namespace the path belongs to, if it is a known entity
    pub fn entity(&self) -> Option<EntityKind> {
        EntityKind::from_path(&self.path)
    }

    /// The HTTP request this operation replays as
    pub fn request(&self) -> ApiRequest {
        ApiRequest {
            verb: self.method.verb(),
            path: self.path.clone(),
            body: self.body.clone(),
        }
    }

    fn to_row(&self) -> Result<OperationRow> {
        Ok(OperationRow {
            seq: self.seq,
            id: self.id.to_string(),
            method: self.method.as_str().to_string(),
            path: self.path.clone(),
            body: self.body.as_ref().map(serde_json::to_string).transpose()?,
            priority: self.priority.as_str().to_string(),
            enqueued_at: self.enqueued_at.to_rfc3339(),
            attempts: i64::from(self.attempts),
            temp_id: self.temp_id.clone(),
            last_error: self.last_error.clone(),
            last_attempt: None,
        })
    }
}

impl TryFrom<OperationRow> for QueuedOperation {
    type Error = String;

    fn try_from(row: OperationRow) -> std::result::Result<Self, String> {
        let id = Uuid::parse_str(&row.id).map_err(|e| format!("bad id: {}", e))?;
        let method = Method::from_str(&row.method).map_err(|e| e.to_string())?;
        let priority = Priority::from_str(&row.priority).map_err(|e| e.to_string())?;
        if !row.path.starts_with('/') {
            return Err(format!("bad path '{}'", row.path));
        }
        let body = row
            .body
            .as_deref()
            .map(serde_json::from_str::<Value>)
            .transpose()
            .map_err(|e| format!("bad body: {}", e))?;
        let enqueued_at = DateTime::parse_from_rfc3339(&row.enqueued_at)
            .map_err(|e| format!("bad enqueued_at: {}", e))?
            .with_timezone(&Utc);
        let attempts = u32::try_from(row.attempts).map_err(|_| format!("bad attempts {}", row.attempts))?;

        Ok(Self {
            id,
            seq: row.seq,
            method,
            path: row.path,
            body: if method == Method::Delete { None } else { body },
            priority,
            enqueued_at,
            attempts,
            temp_id: row.temp_id,
            last_error: row.last_error,
        })
    }
}

/// An operation that will not be retried
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub operation: QueuedOperation,
    /// Human-readable reason shown to the user
    pub reason: String,
    pub failure: FailureClass,
    pub status: Option<u16>,
    pub dead_lettered_at: DateTime<Utc>,
}

impl TryFrom<DeadLetterRow> for DeadLetter {
    type Error = String;

    fn try_from(row: DeadLetterRow) -> std::result::Result<Self, String> {
        let failure = FailureClass::parse(&row.failure).ok_or_else(|| format!("bad failure '{}'", row.failure))?;
        let dead_lettered_at = DateTime::parse_from_rfc3339(&row.dead_lettered_at)
            .map_err(|e| format!("bad dead_lettered_at: {}", e))?
            .with_timezone(&Utc);

        Ok(Self {
            operation: QueuedOperation::try_from(row.operation)?,
            reason: row.reason,
            failure,
            status: row.status.and_then(|s| u16::try_from(s).ok()),
            dead_lettered_at,
        })
    }
}

/// Badge counts, refreshed after every queue mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: u64,
    pub dead_letter: u64,
}

/// A stored queue row that could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorruptEntry {
    pub seq: i64,
    pub id: Option<String>,
    pub reason: String,
}

/// Durable operation queue
#[derive(Debug)]
pub struct OperationQueue {
    db: LocalDatabase,
    events: SyncEventBroadcast,
    counts: watch::Sender<QueueCounts>,
    corrupt: RwLock<Vec<CorruptEntry>>,
}

impl OperationQueue {
    /// Open the queue over `db`, loading the current counts
    ///
    /// Stored rows are scanned once so damaged entries show up in
    /// [`corrupt_entries`](Self::corrupt_entries) before the first drain.
    pub async fn open(db: LocalDatabase, events: SyncEventBroadcast) -> Result<Self> {
        let (counts, _) = watch::channel(QueueCounts::default());
        let queue = Self {
            db,
            events,
            counts,
            corrupt: RwLock::new(Vec::new()),
        };
        queue.refresh_counts().await?;
        queue.load_ordered().await?;
        Ok(queue)
    }

    /// Validate, stamp and persist a new operation
    pub async fn enqueue(&self, new: NewOperation) -> Result<QueuedOperation> {
        new.validate()?;

        let mut operation = QueuedOperation {
            id: Uuid::now_v7(),
            seq: 0,
            method: new.method,
            path: new.path,
            body: if new.method == Method::Delete { None } else { new.body },
            priority: new.priority,
            enqueued_at: Utc::now(),
            attempts: 0,
            temp_id: new.temp_id,
            last_error: None,
        };
        operation.seq = self.db.insert_operation_row(&operation.to_row()?).await?;

        tracing::debug!(
            "[Queue] Enqueued {} {} {} ({})",
            operation.id,
            operation.method,
            operation.path,
            operation.priority
        );
        self.refresh_counts().await?;
        Ok(operation)
    }

    /// Up to `max` operations in drain order, without removing them
    pub async fn dequeue_batch(&self, max: usize) -> Result<Vec<QueuedOperation>> {
        let mut operations = self.load_ordered().await?;
        operations.truncate(max);
        Ok(operations)
    }

    /// Every decodable operation in drain order
    pub async fn peek_all(&self) -> Result<Vec<QueuedOperation>> {
        self.load_ordered().await
    }

    /// Fetch one operation by id
    pub async fn get(&self, id: Uuid) -> Result<Option<QueuedOperation>> {
        match self.db.get_operation_row(&id.to_string()).await? {
            Some(row) => QueuedOperation::try_from(row)
                .map(Some)
                .map_err(|reason| SyncError::QueueCorruption {
                    entry: id.to_string(),
                    reason,
                }),
            None => Ok(None),
        }
    }

    /// Delete a confirmed operation; returns whether it was queued
    pub async fn remove(&self, id: Uuid) -> Result<bool> {
        let removed = self.db.delete_operation_row(&id.to_string()).await?;
        if removed {
            self.refresh_counts().await?;
        }
        Ok(removed)
    }

    /// Record a failed attempt and return the new attempt count
    pub async fn increment_attempts(&self, id: Uuid, reason: &str) -> Result<u32> {
        let attempts = self
            .db
            .increment_operation_attempts(&id.to_string(), Some(reason), &Utc::now().to_rfc3339())
            .await?
            .ok_or_else(|| SyncError::not_found(id))?;
        Ok(u32::try_from(attempts).unwrap_or(u32::MAX))
    }

    /// Move an operation to the dead-letter list and notify observers
    pub async fn move_to_dead_letter(
        &self,
        id: Uuid,
        reason: &str,
        failure: FailureClass,
        status: Option<u16>,
    ) -> Result<DeadLetter> {
        let row = self
            .db
            .move_operation_to_dead_letter(
                &id.to_string(),
                reason,
                failure.as_str(),
                status.map(i64::from),
                &Utc::now().to_rfc3339(),
            )
            .await?
            .ok_or_else(|| SyncError::not_found(id))?;

        let dead = DeadLetter::try_from(row).map_err(|reason| SyncError::QueueCorruption {
            entry: id.to_string(),
            reason,
        })?;

        tracing::warn!(
            "[Queue] Dead-lettered {} {} {}: {}",
            dead.operation.id,
            dead.operation.method,
            dead.operation.path,
            dead.reason
        );
        broadcast_event(
            &self.events,
            SyncEvent::DeadLettered {
                id: dead.operation.id.to_string(),
                path: dead.operation.path.clone(),
                reason: dead.reason.clone(),
                failure,
                status,
            },
        );
        self.refresh_counts().await?;
        Ok(dead)
    }

    /// Number of stored queue rows, including undecodable ones
    pub async fn size(&self) -> Result<u64> {
        Ok(self.db.count_operation_rows().await?)
    }

    /// Dead letters, oldest operation first
    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let rows = self.db.list_dead_letter_rows().await?;
        let mut dead_letters = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.operation.id.clone();
            match DeadLetter::try_from(row) {
                Ok(dead) => dead_letters.push(dead),
                Err(reason) => tracing::warn!("[Queue] Skipping corrupt dead letter {}: {}", id, reason),
            }
        }
        Ok(dead_letters)
    }

    pub async fn dead_letter_count(&self) -> Result<u64> {
        Ok(self.db.count_dead_letter_rows().await?)
    }

    /// Permanently forget a dead letter
    pub async fn discard_dead_letter(&self, id: Uuid) -> Result<()> {
        if !self.db.delete_dead_letter_row(&id.to_string()).await? {
            return Err(SyncError::not_found(id));
        }
        self.refresh_counts().await?;
        Ok(())
    }

    /// Put a dead letter back at the tail of its tier with attempts reset
    pub async fn requeue_dead_letter(&self, id: Uuid) -> Result<QueuedOperation> {
        self.db
            .requeue_dead_letter_row(&id.to_string(), &Utc::now().to_rfc3339())
            .await?
            .ok_or_else(|| SyncError::not_found(id))?;
        self.refresh_counts().await?;

        tracing::info!("[Queue] Requeued dead letter {}", id);
        self.get(id).await?.ok_or_else(|| SyncError::not_found(id))
    }

    /// Rows skipped by the most recent load
    pub async fn corrupt_entries(&self) -> Vec<CorruptEntry> {
        self.corrupt.read().await.clone()
    }

    /// Current badge counts
    pub fn counts(&self) -> QueueCounts {
        *self.counts.borrow()
    }

    /// Receive badge count updates
    pub fn subscribe_counts(&self) -> watch::Receiver<QueueCounts> {
        self.counts.subscribe()
    }

    /// Re-read counts from storage and publish them if they changed
    pub async fn refresh_counts(&self) -> Result<QueueCounts> {
        let counts = QueueCounts {
            pending: self.db.count_operation_rows().await?,
            dead_letter: self.db.count_dead_letter_rows().await?,
        };
        self.counts.send_if_modified(|current| {
            if *current == counts {
                false
            } else {
                *current = counts;
                true
            }
        });
        Ok(counts)
    }

    async fn load_ordered(&self) -> Result<Vec<QueuedOperation>> {
        let rows = self.db.list_operation_rows().await?;

        let mut operations = Vec::with_capacity(rows.len());
        let mut corrupt = Vec::new();
        for row in rows {
            let decoded = row
                .map_err(|bad| CorruptEntry {
                    seq: bad.seq,
                    id: bad.id,
                    reason: bad.reason,
                })
                .and_then(|row| {
                    let (seq, id) = (row.seq, row.id.clone());
                    QueuedOperation::try_from(row).map_err(|reason| CorruptEntry {
                        seq,
                        id: Some(id),
                        reason,
                    })
                });
            match decoded {
                Ok(operation) => operations.push(operation),
                Err(entry) => {
                    tracing::warn!(
                        "[Queue] Skipping corrupt entry seq={} id={:?}: {}",
                        entry.seq,
                        entry.id,
                        entry.reason
                    );
                    corrupt.push(entry);
                }
            }
        }
        *self.corrupt.write().await = corrupt;

        // Rows arrive in seq order; a stable sort keeps FIFO within each tier.
        operations.sort_by_key(|op| op.priority);
        Ok(operations)
    }
}
