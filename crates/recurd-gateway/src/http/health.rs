use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe with engine state.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "scheduler_running": state.scheduler.is_running().await,
        "scheduled_jobs": state.scheduler.scheduled_job_ids().await.len(),
        "tick_interval_ms": state.config.scheduler.tick_interval_ms,
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};

    use crate::http::test_support::{router, send, started_engine};

    #[tokio::test]
    async fn reports_engine_state() {
        let engine = started_engine().await;
        let app = router(&engine);

        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["scheduler_running"], true);
        assert_eq!(body["scheduled_jobs"], 0);

        engine.stop().await;
        let (_, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(body["scheduler_running"], false);
    }
}
