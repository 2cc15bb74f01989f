use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::resolver::{FreeRoomQuery, ResolveError};
use crate::server::types::ApiErrorType;
use crate::types::AppState;

#[derive(Debug, Deserialize)]
pub struct FreeRoomParams {
    pub year: String,
    pub semester: String,
    pub student_id: String,
    pub week: u8,
    pub day: u8,
    /// Comma-separated, e.g. `1,2`
    pub sections: String,
    pub prefix: String,
}

fn parse_sections(raw: &str) -> Option<Vec<u8>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().ok())
        .collect()
}

/// GET /free_rooms
/// Returns per-section availability for rooms matching the prefix
pub async fn get_free_rooms(
    Query(params): Query<FreeRoomParams>,
    State(s): State<Arc<AppState>>,
) -> Response {
    info!(
        "GET /free_rooms (week {}, day {}, sections {}, prefix {})",
        params.week, params.day, params.sections, params.prefix
    );

    let Some(sections) = parse_sections(&params.sections) else {
        return ApiErrorType::from((
            StatusCode::BAD_REQUEST,
            "Sections must be a comma-separated list of numbers",
            Some(params.sections),
        ))
        .into_response();
    };

    let query = FreeRoomQuery {
        year: params.year,
        semester: params.semester,
        student_id: params.student_id,
        week: params.week,
        day: params.day,
        sections,
        prefix: params.prefix,
    };

    match s.resolver.find_free(&query).await {
        Ok(answer) => (StatusCode::OK, Json(answer)).into_response(),
        Err(e @ ResolveError::InvalidQuery { .. }) => ApiErrorType::from((
            StatusCode::BAD_REQUEST,
            "Invalid free-room query",
            Some(e.to_string()),
        ))
        .into_response(),
        Err(e @ ResolveError::SearchFailed { .. }) => ApiErrorType::from((
            StatusCode::SERVICE_UNAVAILABLE,
            "Could not determine free rooms",
            Some(e.to_string()),
        ))
        .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sections() {
        assert_eq!(parse_sections("1,2"), Some(vec![1, 2]));
        assert_eq!(parse_sections(" 3 , 1 ,"), Some(vec![3, 1]));
        assert_eq!(parse_sections(""), Some(vec![]));
        assert_eq!(parse_sections("1,two"), None);
    }
}
