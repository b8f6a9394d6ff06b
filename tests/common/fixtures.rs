//! Facade and database fixtures
//!
//! Every fixture uses a private in-memory database unless a path is given, so
//! tests never share state.

use farmsync::local_db::LocalDatabase;
use farmsync::offline::OfflineSync;
use farmsync::shared::SyncConfig;
use farmsync::sync::network_monitor::{Connectivity, ConnectivityMonitor};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::transport::FakeTransport;

/// In-memory configuration with a fast, jitter-free backoff
pub fn test_config() -> SyncConfig {
    SyncConfig::builder()
        .api_url("http://farm.test")
        .in_memory()
        .max_attempts(3)
        .backoff_base(Duration::from_secs(2))
        .backoff_cap(Duration::from_secs(60))
        .backoff_jitter(0.0)
        .build()
        .expect("test config is valid")
}

pub struct Harness {
    pub sync: OfflineSync,
    pub transport: Arc<FakeTransport>,
    pub monitor: Arc<ConnectivityMonitor>,
}

impl Harness {
    pub async fn new(transport: FakeTransport, connectivity: Connectivity) -> Self {
        Self::with_config(test_config(), transport, connectivity).await
    }

    pub async fn with_config(config: SyncConfig, transport: FakeTransport, connectivity: Connectivity) -> Self {
        let db = LocalDatabase::in_memory().await.expect("in-memory database");
        Self::with_db(db, &config, transport, connectivity).await
    }

    pub async fn online(transport: FakeTransport) -> Self {
        Self::new(transport, Connectivity::Online).await
    }

    pub async fn offline(transport: FakeTransport) -> Self {
        Self::new(transport, Connectivity::Offline).await
    }

    pub async fn with_db(
        db: LocalDatabase,
        config: &SyncConfig,
        transport: FakeTransport,
        connectivity: Connectivity,
    ) -> Self {
        let transport = Arc::new(transport);
        let monitor = Arc::new(ConnectivityMonitor::new(connectivity));
        let sync = OfflineSync::with_parts(config, db, transport.clone(), Arc::clone(&monitor))
            .await
            .expect("facade opens");
        Self {
            sync,
            transport,
            monitor,
        }
    }

    /// Open a file-backed facade; reopening the same path simulates a restart
    pub async fn at_path(path: &Path, transport: FakeTransport, connectivity: Connectivity) -> Self {
        let db = LocalDatabase::open(path).await.expect("file database");
        Self::with_db(db, &test_config(), transport, connectivity).await
    }
}
