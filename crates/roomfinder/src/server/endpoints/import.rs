use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::pipeline::{import_sheets, parse_sidecar, ImportError, UploadedSheet};
use crate::server::types::ApiErrorType;
use crate::types::AppState;

/// Multipart part holding the JSON column sidecar.
const COLUMNS_PART: &str = "columns";

/// POST /import/:year/:semester
/// Imports CSV sheets with free-text schedule notation
pub async fn post_import(
    Path((year, semester)): Path<(String, String)>,
    State(s): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Response {
    info!("POST /import/{}/{}", year, semester);

    let mut sidecar = None;
    let mut sheets = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return ApiErrorType::from((
                    StatusCode::BAD_REQUEST,
                    "Malformed multipart body",
                    Some(e.to_string()),
                ))
                .into_response()
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let data = match field.bytes().await {
            Ok(data) => data,
            Err(e) => {
                return ApiErrorType::from((
                    StatusCode::BAD_REQUEST,
                    "Failed to read upload part",
                    Some(e.to_string()),
                ))
                .into_response()
            }
        };

        if name == COLUMNS_PART {
            sidecar = Some(String::from_utf8_lossy(&data).into_owned());
        } else if let Some(file_name) = file_name {
            sheets.push(UploadedSheet::from_file(&file_name, data.to_vec()));
        } else {
            warn!(part = %name, "Ignoring upload part without a file name");
        }
    }

    let Some(sidecar) = sidecar else {
        return ApiErrorType::from((
            StatusCode::BAD_REQUEST,
            "Missing columns part",
            None,
        ))
        .into_response();
    };

    let result = match parse_sidecar(&sidecar) {
        Ok(columns) => import_sheets(s.index.as_ref(), &year, &semester, &sheets, &columns).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(ImportError::PartialWrite { report, failed }) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Some records failed to write",
                "report": report,
                "failed": failed,
            })),
        )
            .into_response(),
        Err(e @ ImportError::Index(_)) => ApiErrorType::from((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to write imported records",
            Some(e.to_string()),
        ))
        .into_response(),
        Err(e) => ApiErrorType::from((
            StatusCode::BAD_REQUEST,
            "Rejected spreadsheet import",
            Some(e.to_string()),
        ))
        .into_response(),
    }
}
