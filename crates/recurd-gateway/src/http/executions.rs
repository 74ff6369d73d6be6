use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use recurd_scheduler::{format_duration_ms, parse_output, Execution, ExecutionFilter, OutputLine};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ApiError, ApiResult};
use crate::app::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ExecutionQuery {
    pub success: Option<bool>,
    pub limit: Option<u32>,
}

/// Execution record with its output split into leveled lines.
#[derive(Debug, Serialize)]
pub struct ExecutionDetail {
    #[serde(flatten)]
    pub execution: Execution,
    pub duration: String,
    pub lines: Vec<OutputLine>,
}

/// GET /api/jobs/{name}/executions?success=&limit=, newest first.
pub async fn list_for_job(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<ExecutionQuery>,
) -> ApiResult<Json<Value>> {
    let job = state.scheduler.get_job(&name).await?;
    let filter = ExecutionFilter {
        job_id: Some(job.id),
        success: query.success,
        limit: query.limit,
    };
    let executions = state.scheduler.list_executions(&filter).await?;
    Ok(Json(json!({ "job": job.name, "executions": executions })))
}

/// GET /api/executions/{id}
pub async fn get_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ExecutionDetail>> {
    let execution = state
        .scheduler
        .get_execution(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Execution not found: {id}")))?;
    Ok(Json(ExecutionDetail {
        duration: format_duration_ms(execution.duration_ms),
        lines: parse_output(&execution.output),
        execution,
    }))
}
