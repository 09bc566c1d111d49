use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::super::AppState;
use super::error_response;
use crate::core::config::WorkflowDefaults;
use crate::core::metrics::{LAUNCHES, REVISIONS, STOPS};
use crate::core::workflow::{
    Dispatched, LaunchRequest, ReviewGates, WorkflowError, WorkflowEvent,
};

const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Debug, Default, Deserialize)]
pub struct LaunchPayload {
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub repository: String,
    pub branch: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub prompt: String,
    pub workflow_id: Option<String>,
    pub thread_ts: Option<String>,
    pub context_review: Option<bool>,
    pub plan_review: Option<bool>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl LaunchPayload {
    pub fn into_request(self, defaults: &WorkflowDefaults) -> LaunchRequest {
        let gates = defaults.review_gates();
        LaunchRequest {
            workflow_id: non_blank(self.workflow_id),
            channel_id: self.channel_id,
            user_id: self.user_id,
            thread_ts: non_blank(self.thread_ts),
            repository: self.repository,
            branch: non_blank(self.branch).unwrap_or_else(|| defaults.default_branch.clone()),
            model_name: non_blank(self.model).unwrap_or_else(|| defaults.default_model.clone()),
            prompt: self.prompt,
            review_gates: ReviewGates {
                context_review: self.context_review.unwrap_or(gates.context_review),
                plan_review: self.plan_review.unwrap_or(gates.plan_review),
            },
        }
    }
}

pub async fn launch_workflow(
    State(state): State<AppState>,
    Json(payload): Json<LaunchPayload>,
) -> Response {
    state.metrics.incr(LAUNCHES);
    let request = payload.into_request(&state.defaults);
    match state.orchestrator.launch(request).await {
        Ok(outcome) => {
            let status = if outcome.created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (
                status,
                Json(serde_json::json!({
                    "success": true,
                    "created": outcome.created,
                    "workflow": outcome.record,
                })),
            )
                .into_response()
        }
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

pub async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    match state.orchestrator.records().list_workflows(limit).await {
        Ok(workflows) => Json(serde_json::json!({
            "success": true,
            "workflows": workflows,
        }))
        .into_response(),
        Err(e) => error_response(&WorkflowError::Store(e)),
    }
}

pub async fn get_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Response {
    match state.orchestrator.get(&workflow_id).await {
        Ok(record) => Json(serde_json::json!({ "success": true, "workflow": record }))
            .into_response(),
        Err(e) => error_response(&e),
    }
}

fn dispatched_json(dispatched: &Dispatched) -> serde_json::Value {
    match dispatched {
        Dispatched::Applied(record) => serde_json::json!({
            "success": true,
            "status": "applied",
            "workflow": record,
        }),
        Dispatched::Stale { record, reason } => serde_json::json!({
            "success": true,
            "status": "unchanged",
            "reason": reason,
            "workflow": record,
        }),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RevisionPayload {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub feedback: String,
}

pub async fn request_revision(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(payload): Json<RevisionPayload>,
) -> Response {
    state.metrics.incr(REVISIONS);
    let event = WorkflowEvent::RevisionRequested {
        user_id: payload.user_id,
        feedback: payload.feedback,
    };
    match state.orchestrator.dispatch(&workflow_id, event).await {
        Ok(dispatched) => Json(dispatched_json(&dispatched)).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StopPayload {
    #[serde(default)]
    pub user_id: String,
}

pub async fn stop_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(payload): Json<StopPayload>,
) -> Response {
    state.metrics.incr(STOPS);
    let event = WorkflowEvent::StopRequested {
        user_id: payload.user_id,
    };
    match state.orchestrator.dispatch(&workflow_id, event).await {
        Ok(dispatched) => Json(dispatched_json(&dispatched)).into_response(),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_payload_falls_back_to_configured_defaults() {
        let defaults = WorkflowDefaults::default();
        let payload = LaunchPayload {
            channel_id: "C1".to_string(),
            user_id: "U1".to_string(),
            repository: "acme/widgets".to_string(),
            prompt: "do it".to_string(),
            branch: Some("  ".to_string()),
            context_review: Some(true),
            ..Default::default()
        };
        let request = payload.into_request(&defaults);
        assert_eq!(request.branch, "main");
        assert_eq!(request.model_name, "auto");
        assert!(request.review_gates.context_review);
        assert!(request.review_gates.plan_review);
        assert!(request.workflow_id.is_none());
    }
}
