//! # Queue and Sync Metadata Rows
//!
//! Raw storage for the pending operation queue, the dead-letter list and the
//! sync metadata table. Rows carry the stored text exactly as written; the
//! typed view and all ordering rules live in `offline::queue`.
//!
//! ## Features
//!
//! - **Offline Queue**: append-only rows ordered by an autoincrement `seq`
//! - **Dead Letters**: operations moved out of the queue in one transaction
//! - **Sync Metadata**: key/value facts such as the last successful sync
//!
//! ## Usage
//!
//! ```rust,no_run
//! use farmsync::local_db::LocalDatabase;
//!
//! # async fn example(db: LocalDatabase) -> Result<(), sqlx::Error> {
//! for row in db.list_operation_rows().await? {
//!     match row {
//!         Ok(op) => println!("{} {} {}", op.seq, op.method, op.path),
//!         Err(corrupt) => println!("corrupt row {}: {}", corrupt.seq, corrupt.reason),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::local_db::{LocalDatabase, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// A queued operation row as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRow {
    pub seq: i64,
    pub id: String,
    pub method: String,
    pub path: String,
    pub body: Option<String>,
    pub priority: String,
    pub enqueued_at: String,
    pub attempts: i64,
    pub temp_id: Option<String>,
    pub last_error: Option<String>,
    pub last_attempt: Option<String>,
}

/// A row whose columns could not even be read as text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptRow {
    pub seq: i64,
    pub id: Option<String>,
    pub reason: String,
}

/// A dead-lettered operation row as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterRow {
    pub operation: OperationRow,
    pub reason: String,
    pub failure: String,
    pub status: Option<i64>,
    pub dead_lettered_at: String,
}

const OPERATION_COLUMNS: &str =
    "seq, id, method, path, body, priority, enqueued_at, attempts, temp_id, last_error, last_attempt";

impl LocalDatabase {
    /// Append an operation; `row.seq` is ignored and the assigned seq returned
    pub async fn insert_operation_row(&self, row: &OperationRow) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO queued_operations
                (id, method, path, body, priority, enqueued_at, attempts, temp_id, last_error, last_attempt)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.id)
        .bind(&row.method)
        .bind(&row.path)
        .bind(&row.body)
        .bind(&row.priority)
        .bind(&row.enqueued_at)
        .bind(row.attempts)
        .bind(&row.temp_id)
        .bind(&row.last_error)
        .bind(&row.last_attempt)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Every queued row in insertion order
    ///
    /// A row that cannot be read is returned as `Err(CorruptRow)` in its
    /// position instead of failing the whole listing.
    pub async fn list_operation_rows(&self) -> Result<Vec<std::result::Result<OperationRow, CorruptRow>>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM queued_operations ORDER BY seq ASC",
            OPERATION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(read_operation_row).collect())
    }

    /// Fetch one queued row by id
    pub async fn get_operation_row(&self, id: &str) -> Result<Option<OperationRow>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM queued_operations WHERE id = ?",
            OPERATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(operation_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Mark operation as completed
    pub async fn delete_operation_row(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM queued_operations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a failed attempt, returning the new attempt count
    pub async fn increment_operation_attempts(
        &self,
        id: &str,
        error_message: Option<&str>,
        attempted_at: &str,
    ) -> Result<Option<i64>> {
        let row = sqlx::query(
            "UPDATE queued_operations SET
                attempts = attempts + 1,
                last_attempt = ?,
                last_error = COALESCE(?, last_error)
             WHERE id = ?
             RETURNING attempts",
        )
        .bind(attempted_at)
        .bind(error_message)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("attempts")?)),
            None => Ok(None),
        }
    }

    /// Move a queued row into the dead-letter table in one transaction
    pub async fn move_operation_to_dead_letter(
        &self,
        id: &str,
        reason: &str,
        failure: &str,
        status: Option<i64>,
        dead_lettered_at: &str,
    ) -> Result<Option<DeadLetterRow>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM queued_operations WHERE id = ?",
            OPERATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let operation = match row {
            Some(row) => operation_row(&row)?,
            None => return Ok(None),
        };

        sqlx::query(
            "INSERT OR REPLACE INTO dead_letters
                (id, seq, method, path, body, priority, enqueued_at, attempts, temp_id,
                 reason, failure, status, dead_lettered_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&operation.id)
        .bind(operation.seq)
        .bind(&operation.method)
        .bind(&operation.path)
        .bind(&operation.body)
        .bind(&operation.priority)
        .bind(&operation.enqueued_at)
        .bind(operation.attempts)
        .bind(&operation.temp_id)
        .bind(reason)
        .bind(failure)
        .bind(status)
        .bind(dead_lettered_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM queued_operations WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Some(DeadLetterRow {
            operation,
            reason: reason.to_string(),
            failure: failure.to_string(),
            status,
            dead_lettered_at: dead_lettered_at.to_string(),
        }))
    }

    /// Every dead-lettered row, oldest operation first
    pub async fn list_dead_letter_rows(&self) -> Result<Vec<DeadLetterRow>> {
        let rows = sqlx::query(
            "SELECT seq, id, method, path, body, priority, enqueued_at, attempts, temp_id,
                    NULL AS last_error, NULL AS last_attempt,
                    reason, failure, status, dead_lettered_at
             FROM dead_letters
             ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(dead_letter_row).collect()
    }

    /// Delete a dead letter, returning whether it existed
    pub async fn delete_dead_letter_row(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM dead_letters WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Put a dead letter back at the tail of the queue with its attempts reset
    ///
    /// Returns the new seq, or `None` if no dead letter has this id.
    pub async fn requeue_dead_letter_row(&self, id: &str, enqueued_at: &str) -> Result<Option<i64>> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO queued_operations
                (id, method, path, body, priority, enqueued_at, attempts, temp_id)
             SELECT id, method, path, body, priority, ?, 0, temp_id
             FROM dead_letters WHERE id = ?",
        )
        .bind(enqueued_at)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        let seq = result.last_insert_rowid();

        sqlx::query("DELETE FROM dead_letters WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(seq))
    }

    /// Number of queued rows
    pub async fn count_operation_rows(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queued_operations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Number of dead-lettered rows
    pub async fn count_dead_letter_rows(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dead_letters")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Set sync metadata
    pub async fn set_sync_metadata(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO sync_metadata (key, value, updated_at)
             VALUES (?, ?, ?)",
        )
        .bind(key)
        .bind(value)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get sync metadata
    pub async fn get_sync_metadata(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM sync_metadata WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("value")?)),
            None => Ok(None),
        }
    }

    /// Get last sync timestamp
    pub async fn get_last_sync_time(&self) -> Result<Option<String>> {
        self.get_sync_metadata("last_sync_time").await
    }

    /// Set last sync timestamp
    pub async fn set_last_sync_time(&self) -> Result<()> {
        self.set_sync_metadata("last_sync_time", &chrono::Utc::now().to_rfc3339())
            .await
    }
}

fn operation_row(row: &SqliteRow) -> Result<OperationRow> {
    Ok(OperationRow {
        seq: row.try_get("seq")?,
        id: row.try_get("id")?,
        method: row.try_get("method")?,
        path: row.try_get("path")?,
        body: row.try_get("body")?,
        priority: row.try_get("priority")?,
        enqueued_at: row.try_get("enqueued_at")?,
        attempts: row.try_get("attempts")?,
        temp_id: row.try_get("temp_id")?,
        last_error: row.try_get("last_error")?,
        last_attempt: row.try_get("last_attempt")?,
    })
}

fn read_operation_row(row: &SqliteRow) -> std::result::Result<OperationRow, CorruptRow> {
    operation_row(row).map_err(|e| CorruptRow {
        seq: row.try_get("seq").unwrap_or_default(),
        id: row.try_get("id").ok(),
        reason: e.to_string(),
    })
}

fn dead_letter_row(row: &SqliteRow) -> Result<DeadLetterRow> {
    Ok(DeadLetterRow {
        operation: operation_row(row)?,
        reason: row.try_get("reason")?,
        failure: row.try_get("failure")?,
        status: row.try_get("status")?,
        dead_lettered_at: row.try_get("dead_lettered_at")?,
    })
}
