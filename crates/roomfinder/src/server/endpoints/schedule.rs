use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::crawler::{CrawlError, StudentKind, Term};
use crate::server::types::ApiErrorType;
use crate::types::AppState;

#[derive(Debug, Deserialize)]
pub struct ScheduleParams {
    pub student_id: String,
    pub kind: StudentKind,
    pub year: String,
    pub semester: String,
}

fn crawl_error_to_response(error: CrawlError) -> Response {
    let (status, message) = match &error {
        CrawlError::SessionExpired { .. } => (
            StatusCode::UNAUTHORIZED,
            "Session expired - please re-authenticate",
        ),
        CrawlError::Timeout { .. } => (
            StatusCode::GATEWAY_TIMEOUT,
            "Schedule request timed out",
        ),
        CrawlError::ParseError { .. } => (
            StatusCode::BAD_GATEWAY,
            "Could not read the upstream schedule",
        ),
        _ => (StatusCode::BAD_GATEWAY, "Failed to fetch schedule"),
    };

    ApiErrorType::from((status, message, Some(error.to_string()))).into_response()
}

/// GET /schedule
/// Returns a student's normalized timetable
pub async fn get_schedule(
    Query(params): Query<ScheduleParams>,
    State(s): State<Arc<AppState>>,
) -> Response {
    info!("GET /schedule ({:?}, {} {})", params.kind, params.year, params.semester);

    let token = match s.tokens.get_session_token(&params.student_id).await {
        Ok(token) => token,
        Err(e) => {
            warn!(error = %e, "No session for schedule request");
            return ApiErrorType::from((
                StatusCode::BAD_GATEWAY,
                "Failed to obtain a session",
                Some(e.to_string()),
            ))
            .into_response();
        }
    };

    let term = Term {
        year: params.year,
        semester: params.semester,
    };
    match s
        .schedules
        .fetch_schedule(params.kind, &params.student_id, &term, &token)
        .await
    {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(e) => crawl_error_to_response(e),
    }
}
