/**
 * Sync Event Broadcasting
 *
 * Observers (badges, toasts, the feature components holding optimistic
 * records) learn about what the sync layer did through a
 * `tokio::sync::broadcast` channel. Every subscriber receives a copy of each
 * event; a subscriber that falls behind loses the oldest events, never the
 * queue state itself.
 *
 * # Event Types
 *
 * - `DeadLettered`: an operation will not be retried
 * - `IdReplaced`: a temp id was confirmed under a server id
 * - `DrainFinished`: a drain cycle ended
 */

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::shared::error::FailureClass;
use crate::sync::sync_state::DrainStatus;

/// Something observable happened in the sync layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// An operation was moved to the dead-letter list
    DeadLettered {
        id: String,
        path: String,
        reason: String,
        failure: FailureClass,
        status: Option<u16>,
    },
    /// A queued create was confirmed; replace `temp_id` with `server_id`
    IdReplaced {
        temp_id: String,
        server_id: String,
        namespace: Option<String>,
    },
    /// A drain cycle ended
    DrainFinished {
        status: DrainStatus,
        applied: usize,
        dead_lettered: usize,
        remaining: u64,
    },
}

/// Sync event broadcast
///
/// Cloned into every component that emits events.
pub type SyncEventBroadcast = broadcast::Sender<SyncEvent>;

/// Create a sync event channel with the given capacity
pub fn event_channel(capacity: usize) -> SyncEventBroadcast {
    let (tx, _) = broadcast::channel(capacity.max(1));
    tx
}

/// Broadcast a sync event to all subscribers
///
/// Returns the number of subscribers that received it (0 if none). Having no
/// subscribers is not an error.
pub fn broadcast_event(broadcast_tx: &SyncEventBroadcast, event: SyncEvent) -> usize {
    match broadcast_tx.send(event) {
        Ok(subscriber_count) => {
            tracing::debug!("[Sync] Event broadcast to {} subscribers", subscriber_count);
            subscriber_count
        }
        Err(_) => 0,
    }
}
