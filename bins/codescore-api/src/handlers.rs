// HTTP route handlers for the score report

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{debug, error};

use crate::AppState;

/// GET /api/scores - The persisted report, byte for byte
pub async fn get_scores(State(state): State<Arc<AppState>>) -> Response {
    match tokio::fs::read(&state.report_path).await {
        Ok(bytes) => {
            debug!(report = %state.report_path.display(), bytes = bytes.len(), "Report served");
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                bytes,
            )
                .into_response()
        }
        Err(e) => {
            error!(report = %state.report_path.display(), error = %e, "Failed to read report");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": format!("Failed to read score report: {}", e)
                })),
            )
                .into_response()
        }
    }
}
