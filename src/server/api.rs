use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tracing::{error, info};

use crate::pipeline::{Orchestrator, ResponseEnvelope};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }
}

pub type SharedState = Arc<AppState>;

#[derive(Debug, Deserialize)]
pub struct GenerateAppRequest {
    pub prompt: String,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    BadRequest(String),
    NotFound,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ResponseEnvelope::rejected(message))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/generate-app", post(generate_app))
        .route("/health", get(health_check))
}

async fn health_check() -> &'static str {
    "ok"
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}

/// Run the full pipeline for one prompt. Holds the connection until the
/// app has run or a stage has failed. The run is a separate task, so a
/// client that disconnects early does not stop it short of teardown.
async fn generate_app(
    State(state): State<SharedState>,
    payload: Result<Json<GenerateAppRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let prompt = request.prompt.trim();
    if prompt.is_empty() {
        return Err(ApiError::BadRequest("Prompt must not be empty".into()));
    }

    info!(prompt_chars = prompt.len(), "generate-app request");
    let orchestrator = Arc::clone(&state.orchestrator);
    let prompt = prompt.to_string();
    let report = tokio::spawn(async move { orchestrator.run(&prompt).await })
        .await
        .map_err(|e| {
            error!(error = %e, "pipeline task failed");
            ApiError::Internal(format!("Pipeline task failed: {}", e))
        })?;
    let status = if report.is_success() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(report.envelope())).into_response())
}
