//! `HttpTransport` against a mock farm API

use assert_matches::assert_matches;
use farmsync::api_client::{classify, ApiRequest, ApiTransport, Delivery, HttpTransport, TransportError, Verb};
use farmsync::local_db::LocalDatabase;
use farmsync::offline::{Method, OfflineSync, Priority};
use farmsync::shared::{FailureClass, SyncConfig};
use farmsync::sync::network_monitor::{Connectivity, ConnectivityMonitor};
use farmsync::sync::DrainStatus;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::assert_ok;

fn config_for(server: &MockServer) -> SyncConfig {
    SyncConfig::builder()
        .api_url(server.uri())
        .auth_token("farm-token")
        .in_memory()
        .request_timeout(Duration::from_millis(500))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_sends_bearer_token_and_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tasks"))
        .and(header("Authorization", "Bearer farm-token"))
        .and(body_json(json!({"title": "Move herd"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 5, "title": "Move herd"})))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(&config_for(&server));
    let response = assert_ok!(
        transport
            .send(&ApiRequest {
                verb: Verb::Post,
                path: "/tasks".into(),
                body: Some(json!({"title": "Move herd"})),
            })
            .await
    );

    assert_eq!(response.status, 201);
    assert_eq!(response.body, Some(json!({"id": 5, "title": "Move herd"})));
}

#[tokio::test]
async fn test_token_can_be_replaced_and_removed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pens"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(&config_for(&server));
    transport.set_bearer_token(Some("rotated".into())).await;
    assert_ok!(transport.send(&ApiRequest::get("/pens")).await);
    transport.set_bearer_token(None).await;
    assert_ok!(transport.send(&ApiRequest::get("/pens")).await);

    let received = server.received_requests().await.unwrap();
    assert_eq!(
        received[0].headers.get("authorization").and_then(|v| v.to_str().ok()),
        Some("Bearer rotated")
    );
    assert!(received[1].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_error_status_is_classified_with_reason() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/livestock/3"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"message": "weight must be positive"})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/livestock/3"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(&config_for(&server));

    let update = classify(
        transport
            .send(&ApiRequest {
                verb: Verb::Put,
                path: "/livestock/3".into(),
                body: Some(json!({"weight": -1})),
            })
            .await,
    );
    assert_eq!(
        update,
        Delivery::Failed {
            class: FailureClass::Permanent,
            status: Some(422),
            reason: "HTTP 422: weight must be positive".into(),
        }
    );

    let delete = classify(
        transport
            .send(&ApiRequest {
                verb: Verb::Delete,
                path: "/livestock/3".into(),
                body: None,
            })
            .await,
    );
    assert_matches!(
        delete,
        Delivery::Failed { class: FailureClass::Transient, status: Some(503), ref reason } if reason == "HTTP 503: maintenance"
    );
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(&config_for(&server));
    let result = transport.send(&ApiRequest::get("/events")).await;

    assert_matches!(result, Err(TransportError::Timeout(_)));
}

#[tokio::test]
async fn test_refused_connection_is_connect_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = SyncConfig::builder()
        .api_url(format!("http://{}", addr))
        .in_memory()
        .build()
        .unwrap();
    let transport = HttpTransport::new(&config);

    let result = transport.send(&ApiRequest::get("/tasks")).await;
    assert_matches!(result, Err(TransportError::Connect(_)));
    assert_matches!(
        classify(result),
        Delivery::Failed {
            class: FailureClass::Transient,
            status: None,
            ..
        }
    );
}

#[tokio::test]
async fn test_queued_writes_replay_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/breeding-events"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 31, "sow": 4})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/breeding-events/31"))
        .and(body_json(json!({"id": 31, "confirmed": true})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server);
    let db = LocalDatabase::in_memory().await.unwrap();
    let monitor = Arc::new(ConnectivityMonitor::new(Connectivity::Offline));
    let sync = OfflineSync::with_parts(&config, db, Arc::new(HttpTransport::new(&config)), Arc::clone(&monitor))
        .await
        .unwrap();

    let create = assert_ok!(
        sync.queue_api_call("/breeding-events", Method::Create, Some(json!({"sow": 4})), Priority::Normal)
            .await
    );
    let temp_id = create.temp_id.unwrap();
    assert_ok!(
        sync.queue_api_call(
            &format!("/breeding-events/{}", temp_id),
            Method::Update,
            Some(json!({"id": temp_id, "confirmed": true})),
            Priority::Normal,
        )
        .await
    );

    monitor.set_online(true);
    let report = assert_ok!(sync.sync_now().await);

    assert_eq!(report.status, DrainStatus::Completed);
    assert_eq!(report.applied.len(), 2);
    assert_eq!(assert_ok!(sync.pending_count().await), 0);
}
