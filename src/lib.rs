//! farmsync - Offline Synchronization Layer
//!
//! farmsync keeps a farm-management client working without connectivity. It
//! queues mutating API calls durably, serves reads from cached snapshots and
//! replays the queue against the server when the connection returns.
//!
//! # Module Structure
//!
//! - **`shared`** - Types used by every layer
//!   - Error taxonomy, configuration, entity namespaces
//!
//! - **`local_db`** - SQLite persistence
//!   - Snapshots, queued operations, dead letters, id mappings, sync metadata
//!
//! - **`api_client`** - The HTTP seam
//!   - `ApiTransport` trait, `reqwest` implementation, failure classification
//!
//! - **`offline`** - Read/write facade
//!   - Cache store, operation queue, optimistic records, reconciliation, retry policy
//!
//! - **`sync`** - Sync engine
//!   - Drain state machine, backoff scheduler, connectivity monitor, events
//!
//! # Usage
//!
//! ```rust,no_run
//! use farmsync::offline::{Method, OfflineSync, Priority};
//! use farmsync::shared::SyncConfig;
//! use serde_json::json;
//!
//! # async fn example() -> farmsync::shared::Result<()> {
//! let sync = OfflineSync::open(SyncConfig::builder().api_url("https://farm.example.com").build()?).await?;
//! sync.init_offline_sync().await?;
//!
//! sync.set_online(false);
//! sync.mutate("/pens/5", Method::Update, Some(json!({"name": "North"})), Priority::Normal).await?;
//!
//! // Reconnecting drains the queue in the background
//! sync.set_online(true);
//! # Ok(())
//! # }
//! ```

pub mod api_client;
pub mod local_db;
pub mod offline;
pub mod shared;
pub mod sync;

// Re-export commonly used types
pub use offline::OfflineSync;
pub use shared::{Result, SyncConfig, SyncError};
