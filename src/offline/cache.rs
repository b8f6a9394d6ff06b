//! # Local Cache Store
//!
//! Last known-good entity collections, keyed by namespace (`pens`, `tasks`,
//! ...). Written after every successful live read or write, read when the
//! network cannot answer.
//!
//! ## Guarantees
//!
//! - **One snapshot per namespace**: a write replaces the previous one atomically
//! - **Durable**: a write returns only after the row is stored
//! - **Loud failures**: storage and encoding errors are returned, never swallowed
//!
//! ## Usage
//!
//! ```rust,no_run
//! use farmsync::local_db::LocalDatabase;
//! use farmsync::offline::cache::CacheStore;
//! use serde_json::json;
//!
//! # async fn example() -> farmsync::shared::Result<()> {
//! let cache = CacheStore::new(LocalDatabase::in_memory().await?);
//! cache.write("pens", &json!([{"id": 5, "name": "North"}])).await?;
//!
//! if let Some(snapshot) = cache.read("pens").await? {
//!     println!("{} cached at {}", snapshot.namespace, snapshot.stored_at);
//! }
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::local_db::LocalDatabase;
use crate::shared::error::{Result, SyncError};

/// A stored entity snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSnapshot {
    pub namespace: String,
    /// JSON array of records, or a single record
    pub payload: Value,
    pub stored_at: DateTime<Utc>,
}

/// Persistent namespace to snapshot store
#[derive(Debug, Clone)]
pub struct CacheStore {
    db: LocalDatabase,
}

impl CacheStore {
    pub fn new(db: LocalDatabase) -> Self {
        Self { db }
    }

    /// Replace the snapshot of `namespace`
    pub async fn write(&self, namespace: &str, payload: &Value) -> Result<CachedSnapshot> {
        if namespace.trim().is_empty() {
            return Err(SyncError::invalid("namespace", "must not be empty"));
        }

        let stored_at = Utc::now();
        let encoded = serde_json::to_string(payload)?;
        self.db
            .upsert_snapshot(namespace, &encoded, &stored_at.to_rfc3339())
            .await?;

        tracing::debug!("[Cache] Stored snapshot '{}' ({} bytes)", namespace, encoded.len());
        Ok(CachedSnapshot {
            namespace: namespace.to_string(),
            payload: payload.clone(),
            stored_at,
        })
    }

    /// Serialize `records` and store them as the snapshot of `namespace`
    pub async fn write_as<T: Serialize + ?Sized>(&self, namespace: &str, records: &T) -> Result<CachedSnapshot> {
        let payload = serde_json::to_value(records)?;
        self.write(namespace, &payload).await
    }

    /// Snapshot of `namespace`, or `None` when nothing was cached
    pub async fn read(&self, namespace: &str) -> Result<Option<CachedSnapshot>> {
        let Some(row) = self.db.get_snapshot(namespace).await? else {
            return Ok(None);
        };

        let payload: Value = serde_json::from_str(&row.payload).map_err(|e| SyncError::CorruptSnapshot {
            namespace: row.namespace.clone(),
            reason: e.to_string(),
        })?;
        let stored_at = DateTime::parse_from_rfc3339(&row.stored_at)
            .map_err(|e| SyncError::CorruptSnapshot {
                namespace: row.namespace.clone(),
                reason: format!("bad timestamp: {}", e),
            })?
            .with_timezone(&Utc);

        Ok(Some(CachedSnapshot {
            namespace: row.namespace,
            payload,
            stored_at,
        }))
    }

    /// Decode the snapshot of `namespace` into `T`
    pub async fn read_as<T: DeserializeOwned>(&self, namespace: &str) -> Result<Option<T>> {
        match self.read(namespace).await? {
            Some(snapshot) => Ok(Some(serde_json::from_value(snapshot.payload)?)),
            None => Ok(None),
        }
    }

    /// Drop one namespace, or every namespace when `None` (logout)
    pub async fn clear(&self, namespace: Option<&str>) -> Result<u64> {
        let removed = match namespace {
            Some(namespace) => u64::from(self.db.delete_snapshot(namespace).await?),
            None => self.db.delete_all_snapshots().await?,
        };
        tracing::info!("[Cache] Cleared {} snapshot(s)", removed);
        Ok(removed)
    }

    /// Namespaces that currently hold a snapshot
    pub async fn namespaces(&self) -> Result<Vec<String>> {
        Ok(self.db.snapshot_namespaces().await?)
    }
}
