use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};

use super::super::AppState;
use super::error_response;
use crate::core::workflow::WorkflowError;

pub async fn get_active_agents(State(state): State<AppState>) -> Response {
    match state.orchestrator.records().list_agents(true).await {
        Ok(agents) => Json(serde_json::json!({
            "success": true,
            "count": agents.len(),
            "agents": agents,
        }))
        .into_response(),
        Err(e) => error_response(&WorkflowError::Store(e)),
    }
}
