#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for the HTTP ingress, driven over a real socket.

use std::{net::SocketAddr, sync::Arc};

use {
    serde_json::{Value, json},
    sqlx::sqlite::SqlitePoolOptions,
    switchboard_agents::HttpAgentBridge,
    switchboard_channels::{InstanceConfig, InstanceStore},
    switchboard_gateway::{
        Dispatcher, access_store::SqliteAccessRuleStore, instance_store::SqliteInstanceStore,
        server::{build_gateway_app, default_handlers},
        state::GatewayState,
        trace_store::SqliteTraceStore,
    },
    tokio::net::TcpListener,
    wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, method, path},
    },
};

fn acme(upstream: &str) -> InstanceConfig {
    serde_json::from_value(json!({
        "name": "acme",
        "is_default": true,
        "channel_type": "whatsapp",
        "bridge_url": upstream,
        "api_key": "bridge-key",
        "agent": {"url": upstream, "timeout_secs": 5},
    }))
    .unwrap()
}

fn upsert_event(id: &str) -> Value {
    json!({
        "event": "messages.upsert",
        "instance": "acme",
        "data": {
            "key": {"remoteJid": "15550001@s.whatsapp.net", "fromMe": false, "id": id},
            "pushName": "Ada",
            "messageType": "conversation",
            "message": {"conversation": "hello"},
            "messageTimestamp": 1_767_225_600
        }
    })
}

/// Start a gateway backed by in-memory SQLite whose bridge and agent both
/// point at `upstream`.
async fn start_server(upstream: &MockServer) -> SocketAddr {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    switchboard_gateway::run_migrations(&pool).await.unwrap();

    let instances = Arc::new(SqliteInstanceStore::new(pool.clone()));
    instances.upsert(acme(&upstream.uri())).await.unwrap();

    let dispatcher = Dispatcher::new(
        instances,
        Arc::new(SqliteAccessRuleStore::new(pool.clone())),
        default_handlers(),
        Arc::new(HttpAgentBridge::new()),
        Arc::new(SqliteTraceStore::new(pool)),
    );
    let app = build_gateway_app(Arc::new(GatewayState::new(Arc::new(dispatcher))));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn mount_happy_upstream(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/runs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "hi Ada"})))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/message/sendText/acme"))
        .and(body_partial_json(json!({"text": "hi Ada"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"key": {"id": "OUT1"}})))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn webhook_dispatches_and_records_trace() {
    let upstream = MockServer::start().await;
    mount_happy_upstream(&upstream).await;
    let addr = start_server(&upstream).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/webhook/acme"))
        .json(&upsert_event("WAID1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "completed");
    let trace_id = body["trace_id"].as_str().unwrap().to_string();

    // Redelivery through the default-instance route is a duplicate.
    let resp = client
        .post(format!("http://{addr}/webhook"))
        .json(&upsert_event("WAID1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "duplicate");
    assert_eq!(body["trace_id"], trace_id.as_str());
    assert_eq!(body["trace_status"], "completed");

    let trace: Value = client
        .get(format!("http://{addr}/traces/{trace_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(trace["status"], "completed");
    assert_eq!(trace["sender_id"], "+15550001");
    assert_eq!(trace["channel_send_success"], true);

    let list: Value = client
        .get(format!("http://{addr}/traces?instance=acme&status=completed"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["traces"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn webhook_error_statuses() {
    let upstream = MockServer::start().await;
    let addr = start_server(&upstream).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/webhook/ghost"))
        .json(&upsert_event("X"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("ghost"));

    let resp = client
        .post(format!("http://{addr}/webhook/acme"))
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("http://{addr}/webhook/acme"))
        .json(&json!({"event": "connection.update", "data": {"state": "open"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ignored");
    assert!(body["trace_id"].is_null());

    let list: Value = client
        .get(format!("http://{addr}/traces"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(list["traces"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn trace_queries_validate_input() {
    let upstream = MockServer::start().await;
    let addr = start_server(&upstream).await;

    let resp = reqwest::get(format!("http://{addr}/traces?status=bogus"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = reqwest::get(format!("http://{addr}/traces/does-not-exist"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn instance_lifecycle_routes() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/instance/connectionState/acme"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"instance": {"state": "open"}})),
        )
        .mount(&upstream)
        .await;
    let addr = start_server(&upstream).await;

    let resp = reqwest::get(format!("http://{addr}/instances/acme/status"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["state"], "connected");

    let resp = reqwest::get(format!("http://{addr}/instances/ghost/status"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn health_reports_version() {
    let upstream = MockServer::start().await;
    let addr = start_server(&upstream).await;

    let body: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[cfg(feature = "prometheus")]
#[tokio::test]
async fn metrics_endpoint_without_recorder_is_unavailable() {
    let upstream = MockServer::start().await;
    let addr = start_server(&upstream).await;

    let resp = reqwest::get(format!("http://{addr}/metrics")).await.unwrap();
    assert_eq!(resp.status(), 503);
}
