use axum::{Json, extract::State};

use super::super::AppState;

pub async fn get_metrics(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "success": true, "counters": state.metrics.snapshot() }))
}
