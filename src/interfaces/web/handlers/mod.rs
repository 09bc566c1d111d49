pub mod agents;
pub mod decisions;
pub mod metrics;
pub mod slack;
pub mod workflows;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::core::workflow::WorkflowError;

pub(crate) fn status_for(err: &WorkflowError) -> StatusCode {
    match err {
        WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
        WorkflowError::Validation(_) => StatusCode::BAD_REQUEST,
        WorkflowError::Conflict { .. } => StatusCode::CONFLICT,
        WorkflowError::Store(_) | WorkflowError::Remote(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn error_response(err: &WorkflowError) -> Response {
    let status = status_for(err);
    if status.is_server_error() {
        warn!("Request failed: {}", err);
    }
    (
        status,
        Json(serde_json::json!({ "success": false, "error": err.to_string() })),
    )
        .into_response()
}
