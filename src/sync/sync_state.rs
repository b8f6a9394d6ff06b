//! # Sync State
//!
//! Phase of the drain state machine and the status snapshot exposed to the
//! host application.
//!
//! ## Phases
//!
//! ```text
//! Idle -> Draining -> Idle
//! Idle -> Draining -> Backoff -> Idle
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the drain state machine currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Draining,
    /// A cycle halted on a transient failure; a re-trigger is scheduled
    Backoff,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Draining => "draining",
            SyncPhase::Backoff => "backoff",
        };
        f.write_str(name)
    }
}

/// How a trigger ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainStatus {
    /// The queue was drained (dead letters included)
    Completed,
    /// A transient failure stopped the cycle; backoff scheduled
    Halted,
    /// Another drain was already in flight
    Coalesced,
    /// The monitor reported offline
    SkippedOffline,
}

impl DrainStatus {
    /// Whether the trigger actually ran a cycle
    pub fn ran(&self) -> bool {
        matches!(self, DrainStatus::Completed | DrainStatus::Halted)
    }
}

/// Snapshot of the sync layer for status displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    /// RFC 3339 time of the last cycle that ended `Completed`
    pub last_sync: Option<String>,
    /// Halted cycles since the last clean one
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub pending_operations: u64,
    pub dead_letters: u64,
}
