//! Integration tests for the agent API endpoints

use admission_agent::api::{create_router, AppState};
use admission_lib::{
    tracker::ResourceProbe, ActionType, AdmissionControlMode, AdmissionControlSettings,
    IoStatsSnapshot, IoUsageStats, NodeAdmissionControl, NodeResourceUsageStats,
};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct IdleProbe;

#[async_trait]
impl ResourceProbe for IdleProbe {
    async fn cpu_percent(&self) -> anyhow::Result<f64> {
        Ok(5.0)
    }

    async fn memory_used_percent(&self) -> anyhow::Result<f64> {
        Ok(20.0)
    }

    async fn io_stats(&self) -> anyhow::Result<IoStatsSnapshot> {
        Ok(IoStatsSnapshot::new(vec![], 0))
    }
}

fn setup_test_app(mode: AdmissionControlMode) -> (Router, Arc<NodeAdmissionControl>) {
    let mut settings = AdmissionControlSettings {
        transport_mode: mode,
        ..Default::default()
    };
    settings.cpu.search_limit = 80.0;

    let node = Arc::new(
        NodeAdmissionControl::builder()
            .node_id("node-1")
            .probe(Arc::new(IdleProbe))
            .settings(settings)
            .build()
            .unwrap(),
    );
    let router = create_router(Arc::new(AppState::new(node.clone())));
    (router, node)
}

fn publish_cpu(node: &NodeAdmissionControl, cpu: f64) {
    node.usage().publish(NodeResourceUsageStats::new(
        "node-1",
        cpu,
        10.0,
        IoUsageStats::new(-1.0),
    ));
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_readyz_follows_node_lifecycle() {
    let (app, node) = setup_test_app(AdmissionControlMode::Monitor);

    let response = app.clone().oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    node.start().await.unwrap();
    let response = app.clone().oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["ready"], true);

    let response = app.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health = body_json(response).await;
    assert!(health["components"]["resource_tracker"].is_object());
    assert!(health["components"]["perf_stats_monitor"].is_object());

    node.stop().await;
}

#[tokio::test]
async fn test_evaluate_rejects_with_429_when_enforced() {
    let (app, node) = setup_test_app(AdmissionControlMode::Enforced);
    publish_cpu(&node, 85.0);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/_admission/evaluate",
            json!({ "action": "indices:data/read/search" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert_eq!(body["admitted"], false);
    assert_eq!(body["action_type"], "search");

    // Indexing ceiling is still at its default
    let response = app
        .oneshot(json_request(
            "POST",
            "/_admission/evaluate",
            json!({ "action": "bulk", "action_type": "indexing" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rest_gate_applies_admission_by_path() {
    let (app, node) = setup_test_app(AdmissionControlMode::Enforced);
    publish_cpu(&node, 85.0);

    let response = app
        .clone()
        .oneshot(get("/_admission/gate/logs/_search?q=error"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("rejected"));

    // Indexing ceiling is still at its default
    let response = app
        .clone()
        .oneshot(json_request("POST", "/_admission/gate/logs/_doc/1", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["path"], "/logs/_doc/1");
    assert_eq!(body["action_type"], "indexing");

    // Paths that are not searches or writes pass through
    let response = app
        .oneshot(get("/_admission/gate/_cluster/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["action_type"], Value::Null);

    assert_eq!(node.service().rejection_count(ActionType::Search), 1);
}

#[tokio::test]
async fn test_rest_gate_reads_original_uri_header() {
    let (app, node) = setup_test_app(AdmissionControlMode::Enforced);
    publish_cpu(&node, 85.0);

    let request = Request::builder()
        .uri("/_admission/gate/check")
        .header("x-original-uri", "/logs/_msearch")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_evaluate_rejects_bad_action_types() {
    let (app, node) = setup_test_app(AdmissionControlMode::Enforced);
    publish_cpu(&node, 10.0);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/_admission/evaluate",
            json!({ "action": "x", "action_type": "reindex" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(json_request(
            "POST",
            "/_admission/evaluate",
            json!({ "action": "cluster:admin/settings", "action_type": "cluster_admin" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"]
        .as_str()
        .unwrap()
        .contains("configuration"));
}

#[tokio::test]
async fn test_monitor_mode_admits_and_counts() {
    let (app, node) = setup_test_app(AdmissionControlMode::Monitor);
    publish_cpu(&node, 85.0);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/_admission/evaluate",
            json!({ "action": "indices:data/read/search" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(get("/_nodes/stats/admission_control"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stats = body_json(response).await;
    assert_eq!(stats["node_id"], "node-1");
    assert_eq!(stats["transport_mode"], "monitor");
    assert_eq!(stats["controllers"][0]["controller"], "global_cpu_usage");
    assert_eq!(stats["controllers"][0]["rejection_count"]["search"], 1);
}

#[tokio::test]
async fn test_settings_update_round_trip() {
    let (app, _node) = setup_test_app(AdmissionControlMode::Disabled);

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/_cluster/settings",
            json!({
                "persistent": { "admission_control.transport.mode": "enforced" },
                "admission_control.search.cpu_usage.limit": 70
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["acknowledged"], true);
    assert_eq!(body["updated"].as_array().unwrap().len(), 2);

    let response = app.clone().oneshot(get("/_cluster/settings")).await.unwrap();
    let settings = body_json(response).await;
    assert_eq!(settings["admission_control.transport.mode"], "enforced");
    assert_eq!(settings["admission_control.search.cpu_usage.limit"], 70.0);

    let response = app
        .oneshot(json_request(
            "PUT",
            "/_cluster/settings",
            json!({ "admission_control.tracker.window_size": 20 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_remote_perf_stats_drive_node_state() {
    let (app, _node) = setup_test_app(AdmissionControlMode::Enforced);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/_nodes/node-2/perf_stats",
            json!({ "CPU": 95.0, "JVM": 10.0, "IO": 0.0 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["node_id"], "node-2");
    assert_eq!(body["state"], "open");

    let response = app.oneshot(get("/_nodes/admission_state")).await.unwrap();
    assert_eq!(body_json(response).await["node-2"], "open");
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, node) = setup_test_app(AdmissionControlMode::Monitor);
    publish_cpu(&node, 10.0);
    node.evaluate("indices:data/read/search", None).unwrap();

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();
    assert!(metrics_text.contains("admission_control_evaluations_total"));
    assert!(metrics_text.contains("admission_control_evaluation_latency_seconds_bucket"));
}
