//! HTTP API for health checks, Prometheus metrics and admission control

use admission_lib::{
    classify::ActionClassifier,
    health::ComponentStatus,
    interceptor::{AdmissionControlLayer, AdmissionRequest},
    ActionType, AdmissionError, NodeAdmissionControl, NodePerfStats,
};
use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tower::{service_fn, util::BoxCloneService, ServiceBuilder, ServiceExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub node: Arc<NodeAdmissionControl>,
}

impl AppState {
    pub fn new(node: Arc<NodeAdmissionControl>) -> Self {
        Self { node }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SettingsUpdateResponse {
    pub acknowledged: bool,
    pub updated: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EvaluateRequest {
    pub action: String,
    /// Classified from the action name when absent
    #[serde(default)]
    pub action_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PerfStatsResponse {
    pub node_id: String,
    /// `None` while admission control is disabled
    pub state: Option<String>,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.node.health().health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.node.health().readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e);
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn admission_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.node.stats())
}

async fn get_settings(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.node.settings().to_flat_map())
}

/// Accepts flat keys or keys nested under `persistent`/`transient`
async fn put_settings(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Map<String, Value>>,
) -> Response {
    let mut changes = Map::new();
    for (key, value) in body {
        match (key.as_str(), value) {
            ("persistent" | "transient", Value::Object(nested)) => changes.extend(nested),
            (_, value) => {
                changes.insert(key, value);
            }
        }
    }

    match state.node.update_settings(&changes) {
        Ok(updated) => Json(SettingsUpdateResponse {
            acknowledged: true,
            updated,
        })
        .into_response(),
        Err(e) => {
            warn!(error = %e, "Rejected settings update");
            error_response(StatusCode::BAD_REQUEST, e)
        }
    }
}

async fn record_perf_stats(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
    Json(stats): Json<NodePerfStats>,
) -> impl IntoResponse {
    let admission_state = state.node.record_node_perf_stats(&node_id, stats);
    Json(PerfStatsResponse {
        node_id,
        state: admission_state.map(|s| s.to_string()),
    })
}

async fn admission_states(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.node.monitor().states().snapshot())
}

/// 200 when admitted, 429 when rejected, 400 for unknown or unsupported action types
async fn evaluate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EvaluateRequest>,
) -> Response {
    let action_type = match request.action_type.as_deref().map(str::parse::<ActionType>) {
        Some(Err(e)) => return error_response(StatusCode::BAD_REQUEST, e),
        Some(Ok(action_type)) => Some(action_type),
        None => None,
    };

    match state.node.evaluate(&request.action, action_type) {
        Ok(response) if response.admitted => (StatusCode::OK, Json(response)).into_response(),
        Ok(response) => (StatusCode::TOO_MANY_REQUESTS, Json(response)).into_response(),
        Err(e @ AdmissionError::Configuration(_)) => error_response(StatusCode::BAD_REQUEST, e),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// Prefix of the REST ingress gate
pub const GATE_PREFIX: &str = "/_admission/gate";

/// Header a fronting proxy uses to pass the request it is authorizing
pub const ORIGINAL_URI_HEADER: &str = "x-original-uri";

#[derive(Debug, Serialize, Deserialize)]
pub struct GateResponse {
    pub path: String,
    pub action_type: Option<ActionType>,
}

/// A REST request seen by the gate, classified by its path
struct GateRequest {
    path: String,
    action_type: Option<ActionType>,
}

impl GateRequest {
    fn classify(classifier: &ActionClassifier, request: &Request<Body>) -> Self {
        let path = request
            .headers()
            .get(ORIGINAL_URI_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| {
                let path = request.uri().path();
                path.strip_prefix(GATE_PREFIX).unwrap_or(path).to_string()
            });
        let action_type = classifier.classify_uri(&path);
        Self { path, action_type }
    }
}

impl AdmissionRequest for GateRequest {
    fn action(&self) -> &str {
        &self.path
    }

    fn action_type(&self) -> Option<ActionType> {
        self.action_type
    }
}

#[derive(Debug)]
enum GateError {
    Admission(AdmissionError),
}

impl From<AdmissionError> for GateError {
    fn from(err: AdmissionError) -> Self {
        GateError::Admission(err)
    }
}

fn admission_error_response(err: AdmissionError) -> Response {
    match err {
        e @ AdmissionError::Rejected(_) => error_response(StatusCode::TOO_MANY_REQUESTS, e),
        e @ AdmissionError::Configuration(_) => error_response(StatusCode::BAD_REQUEST, e),
    }
}

/// REST ingress gate for a fronting proxy (e.g. an `auth_request` hook).
///
/// Any method under [`GATE_PREFIX`] is classified by path and passed through
/// the admission control layer: 200 when admitted, 429 when rejected.
fn gate_service(
    node: &NodeAdmissionControl,
) -> BoxCloneService<Request<Body>, Response, Infallible> {
    let classifier = node.classifier().clone();

    let admitted = service_fn(|request: GateRequest| async move {
        Ok::<_, GateError>(
            Json(GateResponse {
                path: request.path,
                action_type: request.action_type,
            })
            .into_response(),
        )
    });

    ServiceBuilder::new()
        .map_request(move |request: Request<Body>| GateRequest::classify(&classifier, &request))
        .layer(AdmissionControlLayer::new(node.service().clone()))
        .service(admitted)
        .map_result(|result| {
            Ok::<_, Infallible>(match result {
                Ok(response) => response,
                Err(GateError::Admission(e)) => admission_error_response(e),
            })
        })
        .boxed_clone()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/_nodes/stats/admission_control", get(admission_stats))
        .route("/_nodes/admission_state", get(admission_states))
        .route("/_nodes/:node_id/perf_stats", post(record_perf_stats))
        .route("/_cluster/settings", get(get_settings).put(put_settings))
        .route("/_admission/evaluate", post(evaluate))
        .route_service(&format!("{GATE_PREFIX}/*path"), gate_service(&state.node))
        .with_state(state)
}

/// Start the API server, shutting down gracefully once `token` is cancelled
pub async fn serve(port: u16, state: Arc<AppState>, token: CancellationToken) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;

    Ok(())
}
