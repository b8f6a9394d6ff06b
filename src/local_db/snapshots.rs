//! # Snapshot Rows
//!
//! Raw storage of cached entity snapshots. One row per namespace; writing a
//! namespace replaces its row in a single statement, so readers never observe
//! a half-written snapshot.

use crate::local_db::{LocalDatabase, Result};
use sqlx::Row;

/// A snapshot row as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRow {
    pub namespace: String,
    pub payload: String,
    pub stored_at: String,
}

impl LocalDatabase {
    /// Insert or replace the snapshot of a namespace
    pub async fn upsert_snapshot(&self, namespace: &str, payload: &str, stored_at: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO snapshots (namespace, payload, stored_at) VALUES (?, ?, ?)
             ON CONFLICT(namespace) DO UPDATE SET payload = excluded.payload, stored_at = excluded.stored_at",
        )
        .bind(namespace)
        .bind(payload)
        .bind(stored_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch the snapshot row of a namespace
    pub async fn get_snapshot(&self, namespace: &str) -> Result<Option<SnapshotRow>> {
        let row = sqlx::query("SELECT namespace, payload, stored_at FROM snapshots WHERE namespace = ?")
            .bind(namespace)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(SnapshotRow {
                namespace: row.try_get("namespace")?,
                payload: row.try_get("payload")?,
                stored_at: row.try_get("stored_at")?,
            })),
            None => Ok(None),
        }
    }

    /// Delete one namespace, returning whether a row existed
    pub async fn delete_snapshot(&self, namespace: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM snapshots WHERE namespace = ?")
            .bind(namespace)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every snapshot, returning the number removed
    pub async fn delete_all_snapshots(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM snapshots").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Namespaces that currently have a snapshot
    pub async fn snapshot_namespaces(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT namespace FROM snapshots ORDER BY namespace ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|row| row.try_get("namespace")).collect()
    }
}
