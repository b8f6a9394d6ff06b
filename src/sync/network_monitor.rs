//! # Network Monitor
//!
//! Tracks whether the device believes it is online and tells subscribers
//! about every genuine transition.
//!
//! ## Features
//!
//! - **Connectivity Detection**: online/offline state fed by the host platform
//! - **Transition Ids**: a counter bumped on every real flip
//! - **Deduplication**: repeating the current state notifies nobody
//! - **Subscriptions**: handles that unsubscribe when dropped
//!
//! The monitor is only a hint. A request that fails while the monitor says
//! online is still a failure, and the engine trusts the failure.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};

/// Online or offline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub fn from_online(online: bool) -> Self {
        if online {
            Connectivity::Online
        } else {
            Connectivity::Offline
        }
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connectivity::Online => f.write_str("online"),
            Connectivity::Offline => f.write_str("offline"),
        }
    }
}

/// Current connectivity plus the number of flips so far
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityState {
    pub connectivity: Connectivity,
    pub transition_id: u64,
}

impl ConnectivityState {
    pub fn is_online(&self) -> bool {
        self.connectivity == Connectivity::Online
    }
}

const TRANSITION_CAPACITY: usize = 16;

/// Connectivity monitor
#[derive(Debug)]
pub struct ConnectivityMonitor {
    state: watch::Sender<ConnectivityState>,
    transitions: broadcast::Sender<ConnectivityState>,
}

impl ConnectivityMonitor {
    pub fn new(initial: Connectivity) -> Self {
        let (state, _) = watch::channel(ConnectivityState {
            connectivity: initial,
            transition_id: 0,
        });
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self { state, transitions }
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    /// Feed the platform signal; returns whether it was a genuine transition
    pub fn set_online(&self, online: bool) -> bool {
        let target = Connectivity::from_online(online);
        let transitions = &self.transitions;

        let flipped = self.state.send_if_modified(|state| {
            if state.connectivity == target {
                return false;
            }
            state.connectivity = target;
            state.transition_id += 1;
            // Sent while the state lock is held so subscribers see flips in order.
            let _ = transitions.send(*state);
            true
        });

        if flipped {
            tracing::info!("[Network] Now {} (transition {})", target, self.state().transition_id);
        }
        flipped
    }

    /// Receive one notification per genuine transition from now on
    pub fn subscribe(&self) -> ConnectivitySubscription {
        ConnectivitySubscription {
            receiver: self.transitions.subscribe(),
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.transitions.receiver_count()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(Connectivity::Offline)
    }
}

/// Handle to a stream of transitions; dropping it unsubscribes
#[derive(Debug)]
pub struct ConnectivitySubscription {
    receiver: broadcast::Receiver<ConnectivityState>,
}

impl ConnectivitySubscription {
    /// Next transition, or `None` once the monitor is gone
    ///
    /// Transitions missed by a lagging subscriber are skipped; the next one
    /// still carries the current state.
    pub async fn recv(&mut self) -> Option<ConnectivityState> {
        loop {
            match self.receiver.recv().await {
                Ok(state) => return Some(state),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("[Network] Subscriber lagged by {} transitions", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next transition if one is already waiting
    pub fn try_recv(&mut self) -> Option<ConnectivityState> {
        loop {
            match self.receiver.try_recv() {
                Ok(state) => return Some(state),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}
