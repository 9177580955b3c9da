//! REST surface over the job scheduler.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use prospector::jobs::{JobScheduler, StartJobError};
use prospector::store::Store;
use prospector::types::JobKind;

use crate::stream;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<JobScheduler>,
    pub store: Arc<dyn Store>,
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/bots/{bot_id}/jobs", post(start_job))
        .route("/api/jobs/{job_id}/cancel", post(cancel_job))
        .route("/api/jobs/{job_id}", get(job_status))
        .route("/api/jobs", get(active_jobs))
        .route("/api/runs", get(run_history))
        .route("/api/streams/jobs", get(stream::jobs_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_body(message: impl Into<String>) -> Json<serde_json::Value> {
    Json(json!({ "error": message.into() }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct StartJobRequest {
    kind: String,
    triggered_by: Option<String>,
}

async fn start_job(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
    Json(body): Json<StartJobRequest>,
) -> Response {
    let kind: JobKind = match body.kind.parse() {
        Ok(kind) => kind,
        Err(message) => {
            return (StatusCode::UNPROCESSABLE_ENTITY, error_body(message)).into_response()
        }
    };
    let triggered_by = body.triggered_by.as_deref().unwrap_or("api");

    match state.scheduler.start_job(&bot_id, kind, triggered_by).await {
        Ok(job_id) => (StatusCode::ACCEPTED, Json(json!({ "job_id": job_id }))).into_response(),
        Err(err @ StartJobError::UnknownBot(_)) => {
            (StatusCode::NOT_FOUND, error_body(err.to_string())).into_response()
        }
        Err(err @ StartJobError::BotDisabled(_)) | Err(err @ StartJobError::Overlap { .. }) => {
            (StatusCode::CONFLICT, error_body(err.to_string())).into_response()
        }
        Err(StartJobError::Store(err)) => {
            tracing::error!(error = %err, bot_id, "failed to start job");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body("internal error"),
            )
                .into_response()
        }
    }
}

async fn cancel_job(State(state): State<AppState>, Path(job_id): Path<Uuid>) -> Response {
    let ok = state.scheduler.cancel_job(job_id);
    Json(json!({ "ok": ok })).into_response()
}

async fn job_status(State(state): State<AppState>, Path(job_id): Path<Uuid>) -> Response {
    // Live handles are purged a while after completion; fall back to the
    // persisted job row so old job ids stay resolvable.
    if let Some(snapshot) = state.scheduler.job_status(job_id) {
        return Json(snapshot).into_response();
    }
    match state.store.job_row(job_id).await {
        Ok(Some(snapshot)) => Json(snapshot).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, error_body("unknown job")).into_response(),
        Err(err) => {
            tracing::error!(error = %err, %job_id, "failed to load job row");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body("internal error"),
            )
                .into_response()
        }
    }
}

#[derive(Deserialize)]
struct JobsQuery {
    bot_id: Option<String>,
}

async fn active_jobs(State(state): State<AppState>, Query(query): Query<JobsQuery>) -> Response {
    let jobs = state.scheduler.active_jobs(query.bot_id.as_deref());
    Json(jobs).into_response()
}

#[derive(Deserialize)]
struct RunsQuery {
    bot_id: Option<String>,
    limit: Option<i64>,
}

async fn run_history(State(state): State<AppState>, Query(query): Query<RunsQuery>) -> Response {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    match state.store.run_history(query.bot_id.as_deref(), limit).await {
        Ok(runs) => Json(runs).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "failed to load run history");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body("internal error"),
            )
                .into_response()
        }
    }
}
