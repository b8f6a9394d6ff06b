//! # Local Database Module
//!
//! Local SQLite storage backing the offline synchronization layer. One
//! database file holds every durable piece of offline state:
//!
//! - **Snapshots**: last known-good entity collections, one row per namespace
//! - **Queued operations**: mutating API calls not yet confirmed by the server
//! - **Dead letters**: operations that will not be retried, with their reason
//! - **Id mappings**: optimistic temp ids and the server ids that replaced them
//! - **Sync metadata**: small key/value facts such as the last sync time
//!
//! ## Key Components
//!
//! - `LocalDatabase`: connection pool and schema management
//! - `schema.rs`: schema version bookkeeping
//! - `snapshots.rs`: snapshot rows
//! - `sync.rs`: queue, dead-letter and metadata rows
//! - `id_map.rs`: temp id mappings
//!
//! ## Usage
//!
//! ```rust,no_run
//! use farmsync::local_db::LocalDatabase;
//!
//! # async fn example() -> Result<(), sqlx::Error> {
//! let db = LocalDatabase::open("/var/lib/farm/offline.db").await?;
//! let stats = db.get_stats().await?;
//! println!("{} operations pending", stats.pending_operations);
//! # Ok(())
//! # }
//! ```

pub mod id_map;
pub mod schema;
pub mod snapshots;
pub mod sync;

use crate::shared::config::DatabaseLocation;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Result as SqlxResult, SqlitePool};
use std::path::Path;
use std::str::FromStr;

/// Result type for local database operations
pub type Result<T> = SqlxResult<T>;

/// Local database connection manager
///
/// Manages the SQLite connection pool. Row-level operations live in the
/// submodules as further `impl LocalDatabase` blocks.
#[derive(Debug, Clone)]
pub struct LocalDatabase {
    pool: SqlitePool,
}

impl LocalDatabase {
    /// Open the database described by the configuration
    pub async fn connect(location: &DatabaseLocation) -> Result<Self> {
        match location {
            DatabaseLocation::File(path) => Self::open(path).await,
            DatabaseLocation::InMemory => Self::in_memory().await,
        }
    }

    /// Open or create a database file
    ///
    /// Creates the parent directory and the file if missing. Uses WAL mode so
    /// readers never block the drain loop.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        tracing::info!("[LocalDb] Opened {}", path.display());
        Self::from_pool(pool).await
    }

    /// Open a private in-memory database
    ///
    /// The pool is pinned to a single connection that never idles out, since
    /// every new SQLite memory connection would see an empty database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None::<std::time::Duration>)
            .max_lifetime(None::<std::time::Duration>)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Initialize database schema
    ///
    /// Creates all necessary tables and runs any pending migrations.
    async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(schema::SCHEMA_SQL).execute(&self.pool).await?;
        self.run_migrations().await
    }

    /// Apply every migration newer than the recorded schema version
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await?;
        if !schema::needs_migration(current_version) {
            tracing::debug!("[LocalDb] Schema at version {}", current_version);
            return Ok(());
        }

        for migration in schema::pending_migrations(current_version) {
            self.apply_migration(migration).await?;
            tracing::info!(
                "[LocalDb] Applied schema migration {} ({})",
                migration.version,
                migration.description
            );
        }

        Ok(())
    }

    /// Highest applied schema version, 0 for a fresh database
    pub async fn schema_version(&self) -> Result<i64> {
        let (version,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_one(&self.pool)
                .await?;
        Ok(version)
    }

    async fn apply_migration(&self, migration: &schema::Migration) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if !migration.sql.is_empty() {
            sqlx::raw_sql(migration.sql).execute(&mut *tx).await?;
        }
        sqlx::query("INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?, ?)")
            .bind(migration.version)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        tx.commit().await
    }

    /// Get connection pool reference
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, waiting for in-flight queries
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Get database statistics
    ///
    /// Returns row counts for debugging and the CLI `status` command.
    pub async fn get_stats(&self) -> Result<DatabaseStats> {
        let (snapshot_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM snapshots")
            .fetch_one(&self.pool)
            .await?;

        let (pending_operations,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM queued_operations")
                .fetch_one(&self.pool)
                .await?;

        let (dead_letters,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dead_letters")
            .fetch_one(&self.pool)
            .await?;

        let (id_mappings,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM id_mappings")
            .fetch_one(&self.pool)
            .await?;

        Ok(DatabaseStats {
            snapshot_count: snapshot_count as u64,
            pending_operations: pending_operations as u64,
            dead_letters: dead_letters as u64,
            id_mappings: id_mappings as u64,
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Number of cached namespaces
    pub snapshot_count: u64,
    /// Number of operations waiting to be replayed
    pub pending_operations: u64,
    /// Number of dead-lettered operations
    pub dead_letters: u64,
    /// Number of resolved temp ids
    pub id_mappings: u64,
}
