//! Job administration endpoints. Each handler maps onto one engine operation;
//! scheduler errors become `{ "error": { "code", "message" } }` responses.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use recurd_scheduler::{Job, JobSpec};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::ApiResult;
use crate::app::AppState;

/// PUT /api/jobs/id/{id} body: a full job definition plus `keep_status`.
#[derive(Debug, Deserialize)]
pub struct UpdateJobRequest {
    #[serde(flatten)]
    pub spec: JobSpec,
    #[serde(default)]
    pub keep_status: bool,
}

/// GET /api/functions
pub async fn list_functions(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "functions": state.scheduler.registered_functions() }))
}

/// GET /api/jobs
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let jobs = state.scheduler.list_jobs().await?;
    Ok(Json(json!({ "jobs": jobs })))
}

/// POST /api/jobs
pub async fn add_job(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<JobSpec>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let job = state.scheduler.add_job(spec).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/jobs/{name}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.scheduler.get_job(&name).await?))
}

/// PUT /api/jobs/id/{id}
pub async fn update_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateJobRequest>,
) -> ApiResult<Json<Job>> {
    let job = state
        .scheduler
        .update_job(id, req.spec, req.keep_status)
        .await?;
    Ok(Json(job))
}

/// DELETE /api/jobs/{name}
pub async fn remove_job(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    state.scheduler.remove_job(&name).await?;
    Ok(Json(json!({ "ok": true })))
}

/// POST /api/jobs/{name}/pause
pub async fn pause_job(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Job>> {
    state.scheduler.pause_job(&name).await?;
    Ok(Json(state.scheduler.get_job(&name).await?))
}

/// POST /api/jobs/{name}/resume
pub async fn resume_job(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Job>> {
    state.scheduler.resume_job(&name).await?;
    Ok(Json(state.scheduler.get_job(&name).await?))
}

/// POST /api/jobs/{name}/run. Fire and forget; the result lands in the
/// job's execution history.
pub async fn run_job(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let _handle = state.scheduler.run_job_now(&name).await?;
    info!(job = %name, "manual run accepted");
    Ok((StatusCode::ACCEPTED, Json(json!({ "ok": true, "job": name }))))
}
