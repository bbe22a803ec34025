//! REST API handlers.
//!
//! Each handler drives the replay scheduler, metric store, or fleet view
//! and returns JSON responses (CSV for the download routes).

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;

use loadgrid_core::{JobSpec, epoch_millis};
use loadgrid_replay::ReplayError;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Batches ────────────────────────────────────────────────────

/// Batch submission body.
#[derive(serde::Deserialize)]
pub struct BatchSubmitRequest {
    pub name: String,
    pub jobs: Vec<JobSpec>,
}

/// POST /api/v1/batches
pub async fn submit_batch(
    State(state): State<ApiState>,
    Json(req): Json<BatchSubmitRequest>,
) -> impl IntoResponse {
    if !valid_batch_name(&req.name) {
        return error_response("invalid batch name", StatusCode::BAD_REQUEST).into_response();
    }
    match state.scheduler.submit_batch(&req.name, req.jobs) {
        Ok(status) => (StatusCode::ACCEPTED, ApiResponse::ok(status)).into_response(),
        Err(e @ ReplayError::AlreadyActive { .. }) => {
            error_response(&e.to_string(), StatusCode::CONFLICT).into_response()
        }
        Err(e @ ReplayError::EmptyBatch) => {
            error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/batches/active
pub async fn active_batch(State(state): State<ApiState>) -> impl IntoResponse {
    match state.scheduler.status() {
        Some(status) => ApiResponse::ok(status).into_response(),
        None => error_response("no active batch", StatusCode::NOT_FOUND).into_response(),
    }
}

/// GET /api/v1/batches/{name}/result
pub async fn download_result(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    if !valid_batch_name(&name) {
        return error_response("invalid batch name", StatusCode::BAD_REQUEST).into_response();
    }
    serve_csv(state.scheduler.result_path(&name)).await
}

/// GET /api/v1/batches/{name}/audit
pub async fn download_audit(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    if !valid_batch_name(&name) {
        return error_response("invalid batch name", StatusCode::BAD_REQUEST).into_response();
    }
    serve_csv(state.scaler.audit_path(&name)).await
}

async fn serve_csv(path: std::path::PathBuf) -> axum::response::Response {
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => ([(header::CONTENT_TYPE, "text/csv")], content).into_response(),
        Err(_) => error_response("batch file not found", StatusCode::NOT_FOUND).into_response(),
    }
}

// ── Metrics ────────────────────────────────────────────────────

#[derive(serde::Serialize)]
pub struct MetricReading {
    pub key: String,
    pub value: f64,
    pub at_ms: i64,
}

/// GET /api/v1/metrics/{key}
pub async fn read_metric(
    State(state): State<ApiState>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    let at_ms = epoch_millis();
    match state.store.read_windowed(at_ms, &key, &[]) {
        Some(value) => ApiResponse::ok(MetricReading { key, value, at_ms }).into_response(),
        None => error_response("unknown metric key", StatusCode::NOT_FOUND).into_response(),
    }
}

// ── Fleet ──────────────────────────────────────────────────────

#[derive(serde::Serialize)]
pub struct FleetStatus {
    pub members: Vec<loadgrid_fleet::FleetMember>,
    pub nodes: usize,
    pub queue_depth: i64,
    pub expected_workers: u32,
}

/// GET /api/v1/fleet
pub async fn fleet_status(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(FleetStatus {
        members: state.fleet.snapshot(),
        nodes: state.fleet.node_count(),
        queue_depth: state.scaler.queue_depth(),
        expected_workers: state.scaler.expected_workers(),
    })
}

/// Batch names become file names; restrict to a safe alphabet.
fn valid_batch_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with('.')
}
