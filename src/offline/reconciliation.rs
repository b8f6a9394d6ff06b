//! # State Reconciliation
//!
//! Folds server responses back into local state after a queued operation is
//! confirmed.
//!
//! ## Features
//!
//! - **Temp Id Substitution**: operations queued against an optimistic id are
//!   replayed against the server id once it is known
//! - **Snapshot Refresh**: the cached namespace is updated from the server's
//!   response, never from the locally queued body
//!
//! Records are matched by their `id` field compared as strings, so `5` and
//! `"5"` are the same record.

use serde_json::Value;
use std::collections::HashMap;

use crate::api_client::ApiRequest;
use crate::local_db::LocalDatabase;
use crate::offline::optimistic::is_temp_id;
use crate::offline::queue::{Method, QueuedOperation};
use crate::shared::entity::trailing_id;
use crate::shared::error::Result;

/// Known temp id to server id mappings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdMap {
    resolved: HashMap<String, String>,
}

impl IdMap {
    /// Load every persisted mapping
    pub async fn load(db: &LocalDatabase) -> Result<Self> {
        let resolved = db
            .list_id_mappings()
            .await?
            .into_iter()
            .map(|row| (row.temp_id, row.server_id))
            .collect();
        Ok(Self { resolved })
    }

    pub fn insert(&mut self, temp_id: impl Into<String>, server_id: impl Into<String>) {
        self.resolved.insert(temp_id.into(), server_id.into());
    }

    pub fn get(&self, temp_id: &str) -> Option<&str> {
        self.resolved.get(temp_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    /// The request to send for `operation`, with resolved temp ids replaced
    ///
    /// The stored operation is left untouched.
    pub fn resolve(&self, operation: &QueuedOperation) -> ApiRequest {
        let mut request = operation.request();
        if self.is_empty() {
            return request;
        }

        request.path = self.resolve_path(&request.path);
        if let Some(body) = request.body.as_mut() {
            self.resolve_value(body);
        }
        request
    }

    fn resolve_path(&self, path: &str) -> String {
        let (route, query) = match path.split_once('?') {
            Some((route, query)) => (route, Some(query)),
            None => (path, None),
        };

        let route = route
            .split('/')
            .map(|segment| self.get(segment).unwrap_or(segment))
            .collect::<Vec<_>>()
            .join("/");

        match query {
            Some(query) => format!("{}?{}", route, query),
            None => route,
        }
    }

    fn resolve_value(&self, value: &mut Value) {
        match value {
            Value::String(text) if is_temp_id(text) => {
                if let Some(server_id) = self.get(text) {
                    *value = id_value(server_id);
                }
            }
            Value::Array(items) => items.iter_mut().for_each(|item| self.resolve_value(item)),
            Value::Object(map) => map.values_mut().for_each(|item| self.resolve_value(item)),
            _ => {}
        }
    }
}

/// Numeric server ids go back into bodies as numbers
fn id_value(server_id: &str) -> Value {
    match server_id.parse::<i64>() {
        Ok(number) => Value::from(number),
        Err(_) => Value::String(server_id.to_string()),
    }
}

/// The `id` of a record, as a string
pub fn record_id(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// New snapshot payload after a mutation was confirmed, or `None` if the
/// response says nothing usable about the namespace
///
/// `path` is the path actually sent (temp ids already resolved). `temp_id` is
/// the placeholder of an optimistic create, replaced by the server record.
pub fn apply_response(
    snapshot: &Value,
    method: Method,
    temp_id: Option<&str>,
    path: &str,
    response: Option<&Value>,
) -> Option<Value> {
    if method == Method::Delete {
        let id = trailing_id(path)?;
        return remove_record(snapshot, id);
    }

    match response? {
        Value::Array(records) => Some(Value::Array(records.clone())),
        record @ Value::Object(_) => {
            let id = record_id(record)?;
            upsert_record(snapshot, record, &id, temp_id)
        }
        _ => None,
    }
}

fn remove_record(snapshot: &Value, id: &str) -> Option<Value> {
    match snapshot {
        Value::Array(records) => {
            let kept: Vec<Value> = records
                .iter()
                .filter(|record| record_id(record).as_deref() != Some(id))
                .cloned()
                .collect();
            (kept.len() != records.len()).then_some(Value::Array(kept))
        }
        _ => None,
    }
}

fn upsert_record(snapshot: &Value, record: &Value, id: &str, temp_id: Option<&str>) -> Option<Value> {
    match snapshot {
        Value::Array(records) => {
            let mut updated = Vec::with_capacity(records.len() + 1);
            let mut placed = false;
            for existing in records {
                let existing_id = record_id(existing);
                let matches = existing_id.as_deref() == Some(id)
                    || (temp_id.is_some() && existing_id.as_deref() == temp_id);
                if !matches {
                    updated.push(existing.clone());
                } else if !placed {
                    updated.push(record.clone());
                    placed = true;
                }
            }
            if !placed {
                updated.push(record.clone());
            }
            Some(Value::Array(updated))
        }
        single @ Value::Object(_) if record_id(single).as_deref() == Some(id) => Some(record.clone()),
        _ => None,
    }
}
