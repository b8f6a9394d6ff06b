//! # Optimistic Records
//!
//! While a mutation waits in the queue, the UI shows a synthetic version of
//! the record it will produce. Creates get a placeholder id (`temp_<uuid>`)
//! that is swapped for the server id once the create is confirmed (see
//! `SyncEvent::IdReplaced`).
//!
//! ## Usage
//!
//! ```rust
//! use farmsync::offline::optimistic::{is_temp_id, new_temp_id};
//!
//! let id = new_temp_id();
//! assert!(is_temp_id(&id));
//! assert!(!is_temp_id("42"));
//! ```

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::offline::queue::{Method, QueuedOperation};

/// Prefix of every optimistic placeholder id
pub const TEMP_ID_PREFIX: &str = "temp_";

/// Marker field set on synthetic records
pub const PENDING_FIELD: &str = "_pending";

/// Generate a fresh placeholder id
pub fn new_temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4().simple())
}

/// Whether `id` is a placeholder generated by [`new_temp_id`]
pub fn is_temp_id(id: &str) -> bool {
    id.len() > TEMP_ID_PREFIX.len() && id.starts_with(TEMP_ID_PREFIX)
}

/// The record a feature component should show until `operation` is confirmed
///
/// Creates get the body plus the placeholder id, updates get the body as-is.
/// Both are flagged with `_pending: true`. Deletes and non-object bodies have
/// no synthetic record.
pub fn optimistic_record(operation: &QueuedOperation) -> Option<Value> {
    if operation.method == Method::Delete {
        return None;
    }

    let mut record: Map<String, Value> = match &operation.body {
        Some(Value::Object(map)) => map.clone(),
        None => Map::new(),
        Some(_) => return None,
    };

    if operation.method == Method::Create {
        if let Some(temp_id) = &operation.temp_id {
            record.insert("id".to_string(), Value::String(temp_id.clone()));
        }
    }
    record.insert(PENDING_FIELD.to_string(), Value::Bool(true));
    Some(Value::Object(record))
}
