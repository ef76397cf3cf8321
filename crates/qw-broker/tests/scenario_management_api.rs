//! Management API client against a mock HTTP server (no real broker).

use std::time::Duration;

use httpmock::prelude::*;
use qw_broker::{accounts, BrokerClient, BrokerError, ManagementClient, ManagementSettings};
use serde_json::json;

// guest:guest
const BASIC_AUTH: &str = "Basic Z3Vlc3Q6Z3Vlc3Q=";

fn client_for(server: &MockServer) -> ManagementClient {
    ManagementClient::new(ManagementSettings {
        base_url: server.url("/api/"),
        vhost: "pulse".to_string(),
        user: "guest".to_string(),
        password: "guest".to_string(),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

#[tokio::test]
async fn list_queues_decodes_snapshots_and_sends_basic_auth() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/queues/pulse")
                .header("authorization", BASIC_AUTH);
            then.status(200).json_body(json!([
                {"name": "queue/alice/foo", "vhost": "pulse", "messages": 25,
                 "messages_ready": 20, "durable": true, "consumers": 0},
                {"name": "queue/alice/booting", "vhost": "pulse", "durable": false}
            ]));
        })
        .await;

    let queues = client_for(&server).list_queues().await.unwrap();
    m.assert_async().await;

    assert_eq!(queues.len(), 2);
    let first = queues[0].observe().unwrap();
    assert_eq!(first.name, "queue/alice/foo");
    assert_eq!(first.messages, 25);
    assert_eq!(first.messages_ready, 20);
    assert!(first.durable);
    assert!(queues[1].observe().is_err());
}

#[tokio::test]
async fn list_bindings_drops_default_exchange_entries() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/bindings/pulse");
            then.status(200).json_body(json!([
                {"source": "", "destination": "queue/alice/foo",
                 "destination_type": "queue", "routing_key": "queue/alice/foo", "vhost": "pulse"},
                {"source": "exchange/alice/x", "destination": "queue/alice/foo",
                 "destination_type": "queue", "routing_key": "#", "vhost": "pulse"},
                {"source": "exchange/alice/x", "destination": "exchange/alice/y",
                 "destination_type": "exchange", "routing_key": "#", "vhost": "pulse"}
            ]));
        })
        .await;

    let bindings = client_for(&server).list_bindings().await.unwrap();
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].key(), "exchange/alice/x-#");
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/queues/pulse");
            then.status(200).body("<html>proxy error</html>");
        })
        .await;

    let err = client_for(&server).list_queues().await.unwrap_err();
    assert!(matches!(err, BrokerError::Decode(_)));
    assert!(!err.is_transport());
}

#[tokio::test]
async fn empty_listing_body_is_not_an_empty_listing() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/queues/pulse");
            then.status(200);
        })
        .await;

    let err = client_for(&server).list_queues().await.unwrap_err();
    assert!(matches!(err, BrokerError::Decode(_)));
}

#[tokio::test]
async fn server_error_is_an_api_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/queues/pulse");
            then.status(500)
                .json_body(json!({"error": "internal", "reason": "node down"}));
        })
        .await;

    let err = client_for(&server).list_queues().await.unwrap_err();
    match err {
        BrokerError::Api {
            status, message, ..
        } => {
            assert_eq!(status, 500);
            assert_eq!(message, "node down");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_broker_is_a_transport_error() {
    let client = ManagementClient::new(ManagementSettings {
        base_url: "http://127.0.0.1:1/api/".to_string(),
        vhost: "/".to_string(),
        user: "guest".to_string(),
        password: "guest".to_string(),
        timeout: Duration::from_secs(2),
    })
    .unwrap();

    let err = client.list_queues().await.unwrap_err();
    assert!(err.is_transport(), "got {err:?}");
}

#[tokio::test]
async fn queue_detail_exposes_originating_exchange() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path_contains("/api/queues/pulse/");
            then.status(200).json_body(json!({
                "name": "queue/alice/foo",
                "incoming": [{"exchange": {"name": "exchange/alice/x", "vhost": "pulse"}}]
            }));
        })
        .await;

    let detail = client_for(&server)
        .get_queue_detail("pulse", "queue/alice/foo")
        .await
        .unwrap();
    assert_eq!(detail.originating_exchange(), Some("exchange/alice/x"));
}

#[tokio::test]
async fn delete_queue_accepts_no_content() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(DELETE).path_contains("/api/queues/pulse/");
            then.status(204);
        })
        .await;

    client_for(&server)
        .delete_queue("pulse", "queue/alice/foo")
        .await
        .unwrap();
    m.assert_async().await;
}

#[tokio::test]
async fn missing_user_is_none() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/users/ghost");
            then.status(404)
                .json_body(json!({"error": "Object Not Found", "reason": "Not Found"}));
        })
        .await;

    let user = client_for(&server).get_account("ghost").await.unwrap();
    assert!(user.is_none());
}

#[tokio::test]
async fn provisioning_creates_user_then_grants_namespace() {
    let server = MockServer::start_async().await;
    let create = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/api/users/bob")
                .json_body(json!({"password": "s3cret1", "tags": ""}));
            then.status(201);
        })
        .await;
    let perms = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/api/permissions/pulse/bob")
                .json_body(json!({
                    "configure": "^(queue/bob/.*|exchange/bob/.*)",
                    "write": "^(queue/bob/.*|exchange/bob/.*)",
                    "read": "^(queue/bob/.*|exchange/.*)"
                }));
            then.status(204);
        })
        .await;

    let client = client_for(&server);
    accounts::provision_account(&client, "pulse", "bob", "s3cret1")
        .await
        .unwrap();
    create.assert_async().await;
    perms.assert_async().await;
}

#[tokio::test]
async fn deprovisioning_a_missing_user_succeeds() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(DELETE).path("/api/users/ghost");
            then.status(404).json_body(json!({"error": "Object Not Found"}));
        })
        .await;

    accounts::deprovision_account(&client_for(&server), "ghost")
        .await
        .unwrap();
}
