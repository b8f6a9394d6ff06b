//! Database Schema Definitions
//!
//! The baseline DDL lives in `schema.sql` and is applied on every open.
//! Later changes are numbered [`Migration`]s, recorded in `schema_migrations`
//! once applied.

/// Baseline DDL; every statement is idempotent
pub const SCHEMA_SQL: &str = include_str!("schema.sql");

/// A numbered schema change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    /// Empty for the baseline, which `SCHEMA_SQL` already created
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "baseline tables",
        sql: "",
    },
    Migration {
        version: 2,
        description: "queue drain order index",
        sql: "CREATE INDEX IF NOT EXISTS idx_queued_operations_order
                  ON queued_operations (priority, seq)",
    },
];

/// Version of the newest migration
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

pub fn needs_migration(current_version: i64) -> bool {
    current_version < CURRENT_SCHEMA_VERSION
}

/// Migrations newer than `current_version`, oldest first
pub fn pending_migrations(current_version: i64) -> impl Iterator<Item = &'static Migration> {
    MIGRATIONS
        .iter()
        .filter(move |migration| migration.version > current_version)
}
