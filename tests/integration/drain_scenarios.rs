//! Drain scenarios: replay order, failure handling and backoff

use assert_matches::assert_matches;
use farmsync::offline::{Method, Priority};
use farmsync::shared::{FailureClass, SyncConfig};
use farmsync::sync::events::SyncEvent;
use farmsync::sync::network_monitor::Connectivity;
use farmsync::sync::{DrainStatus, SyncPhase};
use serde_json::json;
use std::time::Duration;

use crate::common::{ok, ok_json, refused, FakeTransport, Harness};
use crate::{assert_contains, assert_ok, assert_requests};

#[tokio::test]
async fn test_high_priority_drains_before_earlier_normal() {
    let h = Harness::online(FakeTransport::new()).await;

    assert_ok!(
        h.sync
            .queue_api_call("/pens/5", Method::Update, Some(json!({"name": "North"})), Priority::Normal)
            .await
    );
    assert_ok!(
        h.sync
            .queue_api_call("/pens", Method::Create, Some(json!({"name": "East"})), Priority::High)
            .await
    );

    let report = assert_ok!(h.sync.sync_now().await);

    assert_eq!(report.status, DrainStatus::Completed);
    assert_eq!(report.applied.len(), 2);
    assert_requests!(h.transport, ["POST /pens", "PUT /pens/5"]);
}

#[tokio::test]
async fn test_fifo_within_priority_and_low_last() {
    let h = Harness::online(FakeTransport::new()).await;

    for (path, priority) in [
        ("/tasks/1", Priority::Low),
        ("/tasks/2", Priority::Normal),
        ("/tasks/3", Priority::Normal),
        ("/tasks/4", Priority::High),
    ] {
        assert_ok!(h.sync.queue_api_call(path, Method::Delete, None, priority).await);
    }

    assert_ok!(h.sync.sync_now().await);

    assert_requests!(
        h.transport,
        ["DELETE /tasks/4", "DELETE /tasks/2", "DELETE /tasks/3", "DELETE /tasks/1"]
    );
}

#[tokio::test]
async fn test_transient_failure_halts_the_rest_of_the_queue() {
    let h = Harness::online(FakeTransport::scripted([ok(200), ok(503)])).await;

    let first = assert_ok!(h.sync.queue_api_call("/tasks/1", Method::Update, Some(json!({})), Priority::Normal).await);
    let second = assert_ok!(h.sync.queue_api_call("/tasks/2", Method::Update, Some(json!({})), Priority::Normal).await);
    let third = assert_ok!(h.sync.queue_api_call("/tasks/3", Method::Update, Some(json!({})), Priority::Normal).await);

    let report = assert_ok!(h.sync.sync_now().await);

    assert_eq!(report.status, DrainStatus::Halted);
    assert_eq!(report.applied, vec![first.id]);
    assert_eq!(report.halted_on, Some(second.id));
    assert_eq!(report.remaining, 2);
    assert_eq!(report.next_retry, Some(Duration::from_secs(2)));
    assert_requests!(h.transport, ["PUT /tasks/1", "PUT /tasks/2"]);

    let queue = h.sync.queue();
    let halted = assert_ok!(queue.get(second.id).await).expect("still queued");
    assert_eq!(halted.attempts, 1);
    assert_contains!(halted.last_error.as_deref().unwrap_or_default(), "503");
    let untouched = assert_ok!(queue.get(third.id).await).expect("still queued");
    assert_eq!(untouched.attempts, 0);

    assert_eq!(h.sync.engine().phase(), SyncPhase::Backoff);
    assert!(h.sync.engine().next_retry_in().await.is_some());

    let status = assert_ok!(h.sync.status().await);
    assert_eq!(status.consecutive_failures, 1);
    assert_eq!(status.pending_operations, 2);
}

#[tokio::test]
async fn test_permanent_failure_dead_letters_and_continues() {
    let h = Harness::online(FakeTransport::scripted([
        ok(200),
        ok_json(422, json!({"error": "title is required"})),
        ok(200),
    ]))
    .await;

    let mut events = h.sync.subscribe_events();
    for n in 1..=3 {
        assert_ok!(
            h.sync
                .queue_api_call(&format!("/events/{}", n), Method::Update, Some(json!({})), Priority::Normal)
                .await
        );
    }
    let rejected = assert_ok!(h.sync.queue().peek_all().await)[1].clone();

    let report = assert_ok!(h.sync.sync_now().await);

    assert_eq!(report.status, DrainStatus::Completed);
    assert_eq!(report.applied.len(), 2);
    assert_eq!(report.dead_lettered, vec![rejected.id]);
    assert_eq!(report.remaining, 0);
    assert_eq!(h.transport.request_count(), 3);

    let dead = assert_ok!(h.sync.dead_letters().await);
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].operation.id, rejected.id);
    assert_eq!(dead[0].operation.attempts, 1);
    assert_eq!(dead[0].failure, FailureClass::Permanent);
    assert_eq!(dead[0].status, Some(422));
    assert_eq!(dead[0].reason, "HTTP 422: title is required");

    assert_matches!(
        events.recv().await,
        Ok(SyncEvent::DeadLettered { status: Some(422), .. })
    );
    assert_matches!(
        events.recv().await,
        Ok(SyncEvent::DrainFinished {
            status: DrainStatus::Completed,
            applied: 2,
            dead_lettered: 1,
            remaining: 0,
        })
    );
}

#[tokio::test]
async fn test_rejected_create_does_not_block_next_operation() {
    let h = Harness::online(FakeTransport::scripted([ok(422), ok(200)])).await;

    let create = assert_ok!(
        h.sync
            .queue_api_call("/tasks", Method::Create, Some(json!({"title": ""})), Priority::Normal)
            .await
    );
    assert_ok!(h.sync.queue_api_call("/pens/2", Method::Delete, None, Priority::Normal).await);

    let report = assert_ok!(h.sync.sync_now().await);

    assert_eq!(report.dead_lettered, vec![create.id]);
    assert_eq!(report.applied.len(), 1);
    assert_requests!(h.transport, ["POST /tasks", "DELETE /pens/2"]);

    let dead = assert_ok!(h.sync.dead_letters().await);
    assert_eq!(dead[0].operation.attempts, 1);
    assert_eq!(dead[0].operation.temp_id, create.temp_id);
}

#[tokio::test]
async fn test_retry_ceiling_dead_letters_after_third_refusal() {
    let transport = FakeTransport::new();
    transport.set_fallback(refused());
    let h = Harness::online(transport).await;

    let op = assert_ok!(
        h.sync
            .queue_api_call("/livestock/7", Method::Update, Some(json!({"weight": 412})), Priority::Normal)
            .await
    );

    let first = assert_ok!(h.sync.sync_now().await);
    assert_eq!(first.status, DrainStatus::Halted);
    assert_eq!(first.next_retry, Some(Duration::from_secs(2)));

    let second = assert_ok!(h.sync.sync_now().await);
    assert_eq!(second.status, DrainStatus::Halted);
    assert_eq!(second.next_retry, Some(Duration::from_secs(4)));
    assert_eq!(assert_ok!(h.sync.queue().get(op.id).await).map(|op| op.attempts), Some(2));

    let third = assert_ok!(h.sync.sync_now().await);
    assert_eq!(third.status, DrainStatus::Completed);
    assert_eq!(third.dead_lettered, vec![op.id]);
    assert_eq!(third.remaining, 0);

    let dead = assert_ok!(h.sync.dead_letters().await);
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].operation.attempts, 3);
    assert_eq!(dead[0].failure, FailureClass::Transient);
    assert_eq!(dead[0].status, None);
    assert_contains!(dead[0].reason, "connection refused");
    assert_contains!(dead[0].reason, "gave up after 3 attempts");

    let status = assert_ok!(h.sync.status().await);
    assert_eq!(status.phase, SyncPhase::Idle);
    assert_eq!(status.consecutive_failures, 0);
    assert!(status.last_sync.is_some());
}

#[tokio::test]
async fn test_retried_dead_letter_replays_at_the_tail() {
    let h = Harness::online(FakeTransport::scripted([ok(409)])).await;

    let op = assert_ok!(h.sync.queue_api_call("/users/3", Method::Delete, None, Priority::High).await);
    assert_ok!(h.sync.sync_now().await);
    assert_eq!(assert_ok!(h.sync.pending_count().await), 0);

    assert_ok!(h.sync.queue_api_call("/users/4", Method::Delete, None, Priority::High).await);
    let requeued = assert_ok!(h.sync.retry_dead_letter(op.id).await);
    assert_eq!(requeued.attempts, 0);
    assert!(assert_ok!(h.sync.dead_letters().await).is_empty());

    let report = assert_ok!(h.sync.sync_now().await);
    assert_eq!(report.applied.len(), 2);
    assert_requests!(h.transport, ["DELETE /users/3", "DELETE /users/4", "DELETE /users/3"]);
}

#[tokio::test]
async fn test_server_id_replaces_placeholder_in_later_operations() {
    let h = Harness::online(FakeTransport::scripted([ok_json(201, json!({"id": 42, "title": "Feed"}))])).await;

    let mut events = h.sync.subscribe_events();
    let create = assert_ok!(
        h.sync
            .queue_api_call("/tasks", Method::Create, Some(json!({"title": "Feed"})), Priority::Normal)
            .await
    );
    let temp_id = create.temp_id.clone().expect("creates get a placeholder");
    assert_ok!(
        h.sync
            .queue_api_call(
                &format!("/tasks/{}", temp_id),
                Method::Update,
                Some(json!({"id": temp_id, "done": true})),
                Priority::Normal,
            )
            .await
    );

    assert_ok!(h.sync.sync_now().await);

    let requests = h.transport.requests();
    assert_eq!(requests[1].path, "/tasks/42");
    assert_eq!(requests[1].body, Some(json!({"id": 42, "done": true})));

    assert_matches!(
        events.recv().await,
        Ok(SyncEvent::IdReplaced { temp_id: replaced, server_id, .. }) if replaced == temp_id && server_id == "42"
    );
}

#[tokio::test]
async fn test_replay_refreshes_existing_snapshot() {
    let h = Harness::online(FakeTransport::scripted([ok_json(201, json!({"id": 8, "name": "West"}))])).await;

    assert_ok!(h.sync.cache_data().pens(&json!([{"id": 1, "name": "North"}])).await);
    assert_ok!(
        h.sync
            .queue_api_call("/pens", Method::Create, Some(json!({"name": "West"})), Priority::Normal)
            .await
    );

    let report = assert_ok!(h.sync.sync_now().await);
    assert!(report.cache_refresh_failures.is_empty());

    let pens = assert_ok!(h.sync.get_cached_data().pens().await);
    let names: Vec<&str> = pens
        .as_array()
        .expect("pens snapshot is a list")
        .iter()
        .filter_map(|pen| pen["name"].as_str())
        .collect();
    assert_eq!(names, vec!["North", "West"]);
}

#[tokio::test]
async fn test_offline_trigger_sends_nothing() {
    let h = Harness::offline(FakeTransport::new()).await;

    assert_ok!(h.sync.queue_api_call("/tasks/1", Method::Delete, None, Priority::Normal).await);
    let report = assert_ok!(h.sync.sync_now().await);

    assert_eq!(report.status, DrainStatus::SkippedOffline);
    assert_eq!(h.transport.request_count(), 0);
    assert_eq!(assert_ok!(h.sync.pending_count().await), 1);
}

#[tokio::test]
async fn test_backoff_timer_retriggers_the_drain() {
    let config = SyncConfig::builder()
        .in_memory()
        .backoff_base(Duration::from_millis(50))
        .backoff_cap(Duration::from_millis(200))
        .backoff_jitter(0.0)
        .build()
        .unwrap();
    let h = Harness::with_config(config, FakeTransport::scripted([ok(503)]), Connectivity::Online).await;

    assert_ok!(h.sync.queue_api_call("/tasks/1", Method::Delete, None, Priority::Normal).await);
    let mut phase = h.sync.engine().subscribe_phase();

    let report = assert_ok!(h.sync.sync_now().await);
    assert_eq!(report.status, DrainStatus::Halted);

    tokio::time::timeout(Duration::from_secs(5), phase.wait_for(|phase| *phase == SyncPhase::Idle))
        .await
        .expect("backoff drain finished in time")
        .unwrap();

    assert_eq!(h.transport.request_count(), 2);
    assert_eq!(assert_ok!(h.sync.pending_count().await), 0);
}

#[tokio::test]
async fn test_manual_trigger_cancels_pending_backoff() {
    let h = Harness::online(FakeTransport::scripted([ok(500)])).await;

    assert_ok!(h.sync.queue_api_call("/tasks/1", Method::Delete, None, Priority::Normal).await);
    assert_ok!(h.sync.sync_now().await);
    assert!(h.sync.engine().next_retry_in().await.is_some());

    let report = assert_ok!(h.sync.sync_now().await);
    assert_eq!(report.status, DrainStatus::Completed);
    assert!(h.sync.engine().next_retry_in().await.is_none());
    assert_eq!(h.sync.engine().phase(), SyncPhase::Idle);
}
