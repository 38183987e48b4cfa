use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::AppState;

/// POST /api/control/pause: Stop taking new signals and retries.
pub async fn pause(State(state): State<AppState>) -> impl IntoResponse {
    state.pause_flag.store(true, Ordering::Relaxed);
    tracing::warn!("Copy engine PAUSED via control API");
    (StatusCode::OK, Json(json!({ "status": "paused" })))
}

/// POST /api/control/resume
pub async fn resume(State(state): State<AppState>) -> impl IntoResponse {
    state.pause_flag.store(false, Ordering::Relaxed);
    tracing::info!("Copy engine RESUMED via control API");
    (StatusCode::OK, Json(json!({ "status": "running" })))
}

/// GET /api/control/status
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let mode = if state.dry_run { "dry_run" } else { "live" };
    Json(json!({
        "mode": mode,
        "paused": state.pause_flag.load(Ordering::Relaxed),
        "gateway": state.engine.gateway().name(),
    }))
}
