use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::types::AppState;

/// GET /health
pub async fn get_health(State(s): State<Arc<AppState>>) -> Response {
    info!("GET /health");

    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "uptime_secs": s.started_at.elapsed().as_secs(),
        })),
    )
        .into_response()
}

/// GET /warm_stats
/// Returns the background warm queue counters
pub async fn get_warm_stats(State(s): State<Arc<AppState>>) -> Response {
    info!("GET /warm_stats");

    match s.warm_queue.as_ref() {
        Some(queue) => (
            StatusCode::OK,
            Json(json!({
                "enabled": true,
                "stats": queue.stats(),
            })),
        )
            .into_response(),
        None => (StatusCode::OK, Json(json!({ "enabled": false }))).into_response(),
    }
}
