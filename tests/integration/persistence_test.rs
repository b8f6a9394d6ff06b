//! Persistence across restarts and handling of damaged rows

use farmsync::local_db::LocalDatabase;
use assert_matches::assert_matches;
use farmsync::offline::{Method, MutationOutcome, Priority};
use farmsync::shared::SyncError;
use farmsync::sync::network_monitor::Connectivity;
use farmsync::sync::DrainStatus;
use serde_json::json;
use tempfile::TempDir;

use crate::common::{ok, ok_json, test_config, FakeTransport, Harness};
use crate::{assert_ok, assert_requests, assert_sync_err};

#[tokio::test]
async fn test_queue_and_snapshots_survive_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("offline.db");

    let (create_id, dead_id) = {
        let h = Harness::at_path(&path, FakeTransport::scripted([ok(400)]), Connectivity::Online).await;
        assert_ok!(h.sync.cache_data().livestock(&json!([{"id": 1, "tag": "A-17"}])).await);

        let dead = assert_ok!(h.sync.queue_api_call("/events/4", Method::Delete, None, Priority::Normal).await);
        assert_ok!(h.sync.sync_now().await);

        h.monitor.set_online(false);
        let create = assert_ok!(
            h.sync
                .queue_api_call("/livestock", Method::Create, Some(json!({"tag": "B-02"})), Priority::High)
                .await
        );
        (create.id, dead.id)
    };

    let h = Harness::at_path(&path, FakeTransport::new(), Connectivity::Offline).await;

    assert_eq!(
        assert_ok!(h.sync.get_cached_data().livestock().await),
        json!([{"id": 1, "tag": "A-17"}])
    );
    let pending = assert_ok!(h.sync.queue().peek_all().await);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, create_id);
    assert_eq!(pending[0].priority, Priority::High);
    assert_eq!(pending[0].body, Some(json!({"tag": "B-02"})));
    assert!(pending[0].temp_id.is_some());

    let dead = assert_ok!(h.sync.dead_letters().await);
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].operation.id, dead_id);
    assert_eq!(dead[0].status, Some(400));

    let status = assert_ok!(h.sync.status().await);
    assert!(status.last_sync.is_some());
    assert_eq!(status.pending_operations, 1);
    assert_eq!(status.dead_letters, 1);
}

#[tokio::test]
async fn test_resolved_ids_survive_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("offline.db");

    let temp_id = {
        let h = Harness::at_path(
            &path,
            FakeTransport::scripted([ok_json(201, json!({"id": "n-77"})), ok(503)]),
            Connectivity::Online,
        )
        .await;
        let create = assert_ok!(
            h.sync
                .queue_api_call("/notifications", Method::Create, Some(json!({"text": "Vet visit"})), Priority::Normal)
                .await
        );
        let temp_id = create.temp_id.expect("placeholder id");
        assert_ok!(
            h.sync
                .queue_api_call(&format!("/notifications/{}", temp_id), Method::Delete, None, Priority::Normal)
                .await
        );

        let report = assert_ok!(h.sync.sync_now().await);
        assert_eq!(report.status, DrainStatus::Halted);
        h.sync.teardown().await;
        temp_id
    };

    let h = Harness::at_path(&path, FakeTransport::new(), Connectivity::Online).await;
    let pending = assert_ok!(h.sync.queue().peek_all().await);
    assert_eq!(pending[0].path, format!("/notifications/{}", temp_id));
    assert_eq!(pending[0].attempts, 1);

    assert_ok!(h.sync.sync_now().await);
    assert_requests!(h.transport, ["DELETE /notifications/n-77"]);
}

#[tokio::test]
async fn test_corrupt_queue_row_is_skipped_not_replayed() {
    let db = LocalDatabase::in_memory().await.unwrap();
    let h = Harness::with_db(db.clone(), &test_config(), FakeTransport::new(), Connectivity::Online).await;

    assert_ok!(h.sync.queue_api_call("/tasks/1", Method::Delete, None, Priority::Normal).await);
    sqlx::query(
        "INSERT INTO queued_operations (id, method, path, body, priority, enqueued_at)
         VALUES ('mangled', 'create', '/tasks', '{\"title\":', 'normal', '2024-03-01T10:00:00Z')",
    )
    .execute(db.pool())
    .await
    .unwrap();
    assert_ok!(h.sync.queue_api_call("/tasks/2", Method::Delete, None, Priority::Normal).await);

    let report = assert_ok!(h.sync.sync_now().await);

    assert_eq!(report.status, DrainStatus::Completed);
    assert_eq!(report.applied.len(), 2);
    assert_eq!(report.remaining, 1);
    assert_requests!(h.transport, ["DELETE /tasks/1", "DELETE /tasks/2"]);

    let corrupt = h.sync.queue().corrupt_entries().await;
    assert_eq!(corrupt.len(), 1);
    assert_eq!(corrupt[0].id.as_deref(), Some("mangled"));
}

#[tokio::test]
async fn test_corrupt_queue_row_is_reported_on_open() {
    let db = LocalDatabase::in_memory().await.unwrap();
    {
        let h = Harness::with_db(db.clone(), &test_config(), FakeTransport::new(), Connectivity::Offline).await;
        assert_ok!(h.sync.queue_api_call("/tasks/1", Method::Delete, None, Priority::Normal).await);
    }
    sqlx::query(
        "INSERT INTO queued_operations (id, method, path, body, priority, enqueued_at)
         VALUES ('mangled', 'create', '/tasks', '{\"title\":', 'normal', '2024-03-01T10:00:00Z')",
    )
    .execute(db.pool())
    .await
    .unwrap();

    let h = Harness::with_db(db.clone(), &test_config(), FakeTransport::new(), Connectivity::Offline).await;

    let corrupt = h.sync.queue().corrupt_entries().await;
    assert_eq!(corrupt.len(), 1);
    assert_eq!(corrupt[0].id.as_deref(), Some("mangled"));
    assert_eq!(assert_ok!(h.sync.queue().size().await), 2);
    assert_eq!(h.transport.request_count(), 0);
}

#[tokio::test]
async fn test_direct_write_survives_corrupt_snapshot() {
    let db = LocalDatabase::in_memory().await.unwrap();
    let h = Harness::with_db(
        db.clone(),
        &test_config(),
        FakeTransport::scripted([ok_json(201, json!({"id": 9, "name": "West"}))]),
        Connectivity::Online,
    )
    .await;

    assert_ok!(h.sync.cache_data().pens(&json!([{"id": 1, "name": "North"}])).await);
    sqlx::query("UPDATE snapshots SET payload = '[{' WHERE namespace = 'pens'")
        .execute(db.pool())
        .await
        .unwrap();

    let outcome = assert_ok!(
        h.sync
            .mutate("/pens", Method::Create, Some(json!({"name": "West"})), Priority::Normal)
            .await
    );

    assert_matches!(outcome, MutationOutcome::Applied { response: Some(_) });
    assert_requests!(h.transport, ["POST /pens"]);
    assert_eq!(assert_ok!(h.sync.pending_count().await), 0);
}

#[tokio::test]
async fn test_corrupt_snapshot_is_reported() {
    let db = LocalDatabase::in_memory().await.unwrap();
    let h = Harness::with_db(db.clone(), &test_config(), FakeTransport::new(), Connectivity::Offline).await;

    assert_ok!(h.sync.cache_data().tasks(&json!([{"id": 1}])).await);
    sqlx::query("UPDATE snapshots SET payload = '[{\"id\":' WHERE namespace = 'tasks'")
        .execute(db.pool())
        .await
        .unwrap();

    assert_sync_err!(h.sync.get_cached_data().tasks().await, SyncError::CorruptSnapshot { .. });

    // Overwriting repairs it
    assert_ok!(h.sync.cache_data().tasks(&json!([])).await);
    assert_eq!(assert_ok!(h.sync.get_cached_data().tasks().await), json!([]));
}
