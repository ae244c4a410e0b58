//! HTTP trigger surface
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/health` | Liveness |
//! | GET | `/api/status` | Status of every app |
//! | POST | `/restart-region` | Queue a region batch, answers 202 |
//! | POST | `/restart-all` | Restart every app at once |

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::bridge::Bridge;
use crate::warden::WardenHandle;

/// Operator recorded when a request names none
pub const DEFAULT_OPERATOR: &str = "user";

/// Shared state for handlers
#[derive(Clone)]
pub struct ApiState {
    pub bridge: Arc<Bridge>,
    pub warden: WardenHandle,
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/restart-region", post(restart_region))
        .route("/restart-all", post(restart_all))
        .with_state(state)
}

/// Response wrapper for consistent API format
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
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

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TriggerRequest {
    region: Option<String>,
    operator: Option<String>,
}

impl TriggerRequest {
    fn parse(body: &[u8]) -> std::result::Result<Self, String> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|e| format!("invalid request body: {}", e))
    }

    fn operator(&self) -> String {
        self.operator
            .as_deref()
            .map(str::trim)
            .filter(|op| !op.is_empty())
            .unwrap_or(DEFAULT_OPERATOR)
            .to_string()
    }
}

#[derive(Serialize)]
struct QueuedBatch {
    region: String,
    operator: String,
    apps: usize,
    message: String,
}

/// GET /health
async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let now = state.bridge.crew().clock.now();
    ApiResponse::ok(serde_json::json!({ "timestamp": now }))
}

/// GET /api/status
async fn status(State(state): State<ApiState>) -> impl IntoResponse {
    match state.bridge.status().await {
        Ok(statuses) => ApiResponse::ok(statuses).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// POST /restart-region
async fn restart_region(State(state): State<ApiState>, body: Bytes) -> impl IntoResponse {
    let request = match TriggerRequest::parse(&body) {
        Ok(request) => request,
        Err(e) => return error_response(&e, StatusCode::BAD_REQUEST).into_response(),
    };
    let Some(region) = request.region.as_deref().map(str::trim).filter(|r| !r.is_empty()) else {
        return error_response("missing region", StatusCode::BAD_REQUEST).into_response();
    };
    let operator = request.operator();

    let apps = match state.bridge.validate_region(region) {
        Ok(apps) => apps,
        Err(e) => return error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response(),
    };

    if let Err(e) = state.warden.submit_region_restart(region, &operator) {
        warn!(error = %e, "could not queue region restart");
        return error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE).into_response();
    }
    info!(region, %operator, apps = apps.len(), "region restart queued");

    (
        StatusCode::ACCEPTED,
        ApiResponse::ok(QueuedBatch {
            region: region.to_string(),
            operator,
            apps: apps.len(),
            message: "restart queued, progress is reported through notifications".into(),
        }),
    )
        .into_response()
}

/// POST /restart-all
async fn restart_all(State(state): State<ApiState>, body: Bytes) -> impl IntoResponse {
    let request = match TriggerRequest::parse(&body) {
        Ok(request) => request,
        Err(e) => return error_response(&e, StatusCode::BAD_REQUEST).into_response(),
    };
    let outcomes = state.bridge.restart_everything(&request.operator()).await;
    ApiResponse::ok(outcomes).into_response()
}
