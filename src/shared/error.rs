//! Shared Error Types
//!
//! This module defines the error taxonomy used by every component of the
//! offline synchronization layer.
//!
//! # Error Categories
//!
//! - `Transient` - network failures, timeouts and 5xx responses; retried with backoff
//! - `Permanent` - client-side rejections (4xx); dead-lettered without retry
//! - `Storage` - local persistence failures, always surfaced to the caller
//! - `QueueCorruption` - a stored queue entry that can no longer be decoded
//!
//! # Usage
//!
//! ```rust
//! use farmsync::shared::error::SyncError;
//!
//! let error = SyncError::invalid("path", "must start with '/'");
//! assert!(!error.is_transient());
//! ```
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::config::ConfigError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, SyncError>;

/// How a failed replay should be treated by the sync engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Likely to succeed on retry (network, timeout, server side)
    Transient,
    /// Will never succeed without changing the request
    Permanent,
}

impl FailureClass {
    /// Stable name used for persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Transient => "transient",
            FailureClass::Permanent => "permanent",
        }
    }

    /// Parse the persisted name back
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "transient" => Some(FailureClass::Transient),
            "permanent" => Some(FailureClass::Permanent),
            _ => None,
        }
    }
}

/// Errors produced by the offline synchronization layer
#[derive(Debug, Error)]
pub enum SyncError {
    /// The server could not be reached or answered with a retryable failure
    #[error("Transient failure: {message}")]
    Transient {
        /// Human-readable error message
        message: String,
    },

    /// The server rejected the request; retrying will not help
    #[error("Permanent failure ({}): {message}", status.map(|s| s.to_string()).unwrap_or_else(|| "no status".to_string()))]
    Permanent {
        /// HTTP status returned by the server, if any
        status: Option<u16>,
        /// Human-readable error message
        message: String,
    },

    /// Local persistence failed (disk full, I/O, locked database)
    #[error("Storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    /// A payload could not be serialized or deserialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored queue entry is malformed
    #[error("Queue entry {entry} is corrupt: {reason}")]
    QueueCorruption {
        /// Row identifier of the corrupt entry
        entry: String,
        /// What failed to decode
        reason: String,
    },

    /// A stored snapshot is malformed
    #[error("Snapshot '{namespace}' is corrupt: {reason}")]
    CorruptSnapshot {
        /// Namespace of the snapshot
        namespace: String,
        /// What failed to decode
        reason: String,
    },

    /// An operation was rejected before it reached the queue
    #[error("Invalid operation field '{field}': {message}")]
    InvalidOperation {
        /// The offending field
        field: String,
        /// Human-readable error message
        message: String,
    },

    /// No queued or dead-lettered operation with this id
    #[error("Operation {id} not found")]
    NotFound {
        /// Operation id that was looked up
        id: String,
    },

    /// Configuration could not be built
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SyncError {
    /// Create a new transient error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Create a new permanent error
    pub fn permanent(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Permanent {
            status,
            message: message.into(),
        }
    }

    /// Create a new validation error for an operation field
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new not-found error
    pub fn not_found(id: impl ToString) -> Self {
        Self::NotFound { id: id.to_string() }
    }

    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient { .. })
    }

    /// The failure class, for errors that came from the network
    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            SyncError::Transient { .. } => Some(FailureClass::Transient),
            SyncError::Permanent { .. } => Some(FailureClass::Permanent),
            _ => None,
        }
    }
}
