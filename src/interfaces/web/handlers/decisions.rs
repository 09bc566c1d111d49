use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};

use super::super::AppState;
use super::error_response;
use crate::core::metrics::{DECISIONS, DECISIONS_STALE};
use crate::core::workflow::{DecisionOutcome, DecisionRequest, handle_decision};

pub(crate) fn outcome_json(outcome: &DecisionOutcome) -> serde_json::Value {
    let record = outcome.record();
    serde_json::json!({
        "success": true,
        "status": outcome.status(),
        "workflow_id": record.workflow_id,
        "phase": record.phase,
    })
}

pub(crate) async fn apply_decision(state: &AppState, request: &DecisionRequest) -> Response {
    state.metrics.incr(DECISIONS);
    match handle_decision(&state.orchestrator, request).await {
        Ok(outcome) => {
            if matches!(outcome, DecisionOutcome::AlreadyResolved(_)) {
                state.metrics.incr(DECISIONS_STALE);
            }
            Json(outcome_json(&outcome)).into_response()
        }
        Err(e) => error_response(&e),
    }
}

pub async fn decision_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<DecisionRequest>,
) -> Response {
    apply_decision(&state, &payload).await
}
