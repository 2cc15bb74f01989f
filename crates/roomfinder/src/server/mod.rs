use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::server::endpoints::{free_rooms, import, schedule, status};
use crate::types::AppState;

mod endpoints;
mod types;

/// Creates a router that can be used by `axum`.
///
/// # Parameters
/// - `app_state`: The app server state.
///
/// # Returns
/// The router.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(status::get_health))
        .route("/warm_stats", get(status::get_warm_stats))
        .route("/free_rooms", get(free_rooms::get_free_rooms))
        .route("/schedule", get(schedule::get_schedule))
        .route("/import/:year/:semester", post(import::post_import))
        .with_state(app_state)
}
