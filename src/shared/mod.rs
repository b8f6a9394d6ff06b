//! Shared Module
//!
//! Types used by every layer of the offline synchronization subsystem:
//! the error taxonomy, configuration, and entity namespaces.

/// Error taxonomy
pub mod error;

/// Sync configuration
pub mod config;

/// Entity namespaces and path helpers
pub mod entity;

/// Re-export commonly used types for convenience
pub use config::{ConfigError, DatabaseLocation, SyncConfig, SyncConfigBuilder};
pub use entity::EntityKind;
pub use error::{FailureClass, Result, SyncError};
