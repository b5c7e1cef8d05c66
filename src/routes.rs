//! REST endpoints for running triage, approving items and applying labels.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

use crate::error::TriageError;
use crate::triage::TriageService;
use crate::triage::model::Approval;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TriageService>,
}

/// Build the Axum router with all triage routes.
pub fn triage_routes(service: Arc<TriageService>) -> Router {
    let state = AppState { service };

    Router::new()
        .route("/health", get(health))
        .route("/triage/run", post(run_triage))
        .route("/triage/batches/latest", get(latest_batch))
        .route("/triage/batches/{batch_id}/items", get(batch_items))
        .route("/triage/batches/{batch_id}/apply-log", get(apply_log))
        .route("/triage/approve", post(approve))
        .route("/triage/approvals", get(list_approvals))
        .route("/triage/apply", post(apply))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Errors ──────────────────────────────────────────────────────────────

impl IntoResponse for TriageError {
    fn into_response(self) -> Response {
        let status = match &self {
            TriageError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            TriageError::NoBatchFound => StatusCode::NOT_FOUND,
            TriageError::Mailbox(_) | TriageError::Suggest(_) => {
                warn!(error = %self, "Upstream failure");
                StatusCode::BAD_GATEWAY
            }
            TriageError::ExternalActionFailed { .. } => StatusCode::BAD_GATEWAY,
            TriageError::Persistence(_) => {
                error!(error = %self, "Persistence failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}

// ── Request types ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RunParams {
    max_results: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct BatchParams {
    batch_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApproveRequest {
    #[serde(default)]
    batch_id: Option<String>,
    #[serde(default)]
    approvals: HashMap<String, Approval>,
}

// ── Handlers ────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "inbox-triage",
        "mode": state.service.mode(),
    }))
}

async fn run_triage(
    State(state): State<AppState>,
    Query(params): Query<RunParams>,
) -> Result<impl IntoResponse, TriageError> {
    let outcome = state.service.run(params.max_results).await?;
    Ok(Json(outcome))
}

async fn latest_batch(State(state): State<AppState>) -> Result<impl IntoResponse, TriageError> {
    let batch = state
        .service
        .latest_batch()
        .await?
        .ok_or(TriageError::NoBatchFound)?;
    Ok(Json(batch))
}

async fn batch_items(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<impl IntoResponse, TriageError> {
    let items = state.service.batch_items(&batch_id).await?;
    Ok(Json(json!({"batch_id": batch_id, "items": items})))
}

async fn apply_log(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<impl IntoResponse, TriageError> {
    let entries = state.service.apply_log(&batch_id).await?;
    Ok(Json(json!({"batch_id": batch_id, "entries": entries})))
}

async fn approve(
    State(state): State<AppState>,
    payload: Result<Json<ApproveRequest>, JsonRejection>,
) -> Result<impl IntoResponse, TriageError> {
    let Json(request) =
        payload.map_err(|rejection| TriageError::InvalidRequest(rejection.body_text()))?;
    let count = state
        .service
        .approve(request.batch_id.as_deref(), &request.approvals)
        .await?;
    Ok(Json(json!({
        "batch_id": request.batch_id,
        "approved_count": count,
    })))
}

async fn list_approvals(
    State(state): State<AppState>,
    Query(params): Query<BatchParams>,
) -> Result<impl IntoResponse, TriageError> {
    let (batch_id, approvals) = state
        .service
        .list_approved(params.batch_id.as_deref())
        .await?;
    Ok(Json(json!({"batch_id": batch_id, "approvals": approvals})))
}

async fn apply(
    State(state): State<AppState>,
    Query(params): Query<BatchParams>,
) -> Result<impl IntoResponse, TriageError> {
    let report = state.service.apply(params.batch_id.as_deref()).await?;
    Ok(Json(report))
}
