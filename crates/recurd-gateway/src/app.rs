use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use recurd_core::config::RecurdConfig;
use recurd_scheduler::SchedulerEngine;

use crate::http::{executions, health, jobs};

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: RecurdConfig,
    pub scheduler: SchedulerEngine,
}

impl AppState {
    pub fn new(config: RecurdConfig, scheduler: SchedulerEngine) -> Self {
        Self { config, scheduler }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/functions", get(jobs::list_functions))
        .route("/api/jobs", get(jobs::list_jobs).post(jobs::add_job))
        .route("/api/jobs/id/{id}", put(jobs::update_job))
        .route(
            "/api/jobs/{name}",
            get(jobs::get_job).delete(jobs::remove_job),
        )
        .route("/api/jobs/{name}/pause", post(jobs::pause_job))
        .route("/api/jobs/{name}/resume", post(jobs::resume_job))
        .route("/api/jobs/{name}/run", post(jobs::run_job))
        .route("/api/jobs/{name}/executions", get(executions::list_for_job))
        .route("/api/executions/{id}", get(executions::get_execution))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
