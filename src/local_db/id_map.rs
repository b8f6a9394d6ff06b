//! Temp id mappings
//!
//! When a queued create succeeds, the server-assigned id replaces the
//! optimistic temp id. The mapping is kept so that later queued operations
//! still referring to the temp id can be rewritten at replay time.

use crate::local_db::{LocalDatabase, Result};
use sqlx::Row;

/// A resolved temp id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdMappingRow {
    pub temp_id: String,
    pub server_id: String,
    pub namespace: Option<String>,
    pub resolved_at: String,
}

impl LocalDatabase {
    /// Record (or overwrite) the server id for a temp id
    pub async fn record_id_mapping(
        &self,
        temp_id: &str,
        server_id: &str,
        namespace: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO id_mappings (temp_id, server_id, namespace, resolved_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(temp_id)
        .bind(server_id)
        .bind(namespace)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Server id for a temp id, if resolved
    pub async fn lookup_id_mapping(&self, temp_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT server_id FROM id_mappings WHERE temp_id = ?")
            .bind(temp_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("server_id")?)),
            None => Ok(None),
        }
    }

    /// All mappings, oldest first
    pub async fn list_id_mappings(&self) -> Result<Vec<IdMappingRow>> {
        let rows = sqlx::query(
            "SELECT temp_id, server_id, namespace, resolved_at FROM id_mappings
             ORDER BY resolved_at ASC, temp_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(IdMappingRow {
                    temp_id: row.try_get("temp_id")?,
                    server_id: row.try_get("server_id")?,
                    namespace: row.try_get("namespace")?,
                    resolved_at: row.try_get("resolved_at")?,
                })
            })
            .collect()
    }

    /// Forget every mapping
    pub async fn clear_id_mappings(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM id_mappings").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
