use serde::Deserialize;
use tracing::info;

use super::error::WorkflowError;
use super::machine::WorkflowEvent;
use super::orchestrator::{Dispatched, Orchestrator};
use super::types::{DecisionAction, ReviewGate, WorkflowRecord};

/// Raw accept/reject request as it arrives from HTTP or a chat button.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DecisionRequest {
    #[serde(default)]
    pub workflow_id: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidDecision {
    pub workflow_id: String,
    pub gate: ReviewGate,
    pub action: DecisionAction,
    pub user_id: String,
}

impl DecisionRequest {
    pub fn validate(&self) -> Result<ValidDecision, WorkflowError> {
        let workflow_id = self.workflow_id.trim();
        if workflow_id.is_empty() {
            return Err(WorkflowError::Validation(
                "workflow_id is required".to_string(),
            ));
        }
        let action = DecisionAction::parse(&self.action).ok_or_else(|| {
            WorkflowError::Validation(format!(
                "action must be 'accept' or 'reject', got '{}'",
                self.action
            ))
        })?;
        let gate = ReviewGate::parse(&self.phase).ok_or_else(|| {
            WorkflowError::Validation(format!(
                "phase must be 'context_review' or 'plan_review', got '{}'",
                self.phase
            ))
        })?;
        let user_id = match self.user_id.trim() {
            "" => "unknown".to_string(),
            id => id.to_string(),
        };
        Ok(ValidDecision {
            workflow_id: workflow_id.to_string(),
            gate,
            action,
            user_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecisionOutcome {
    Applied(WorkflowRecord),
    /// Someone already resolved this review. Treated as success.
    AlreadyResolved(WorkflowRecord),
}

impl DecisionOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            DecisionOutcome::Applied(_) => "applied",
            DecisionOutcome::AlreadyResolved(_) => "already_resolved",
        }
    }

    pub fn record(&self) -> &WorkflowRecord {
        match self {
            DecisionOutcome::Applied(record) | DecisionOutcome::AlreadyResolved(record) => record,
        }
    }
}

/// Validates and applies a review decision.
pub async fn handle_decision(
    orchestrator: &Orchestrator,
    request: &DecisionRequest,
) -> Result<DecisionOutcome, WorkflowError> {
    let decision = request.validate()?;
    let event = WorkflowEvent::UserDecision {
        gate: decision.gate,
        action: decision.action,
        user_id: decision.user_id.clone(),
    };
    match orchestrator.dispatch(&decision.workflow_id, event).await? {
        Dispatched::Applied(record) => {
            info!(
                workflow_id = %decision.workflow_id,
                user_id = %decision.user_id,
                action = decision.action.as_str(),
                gate = decision.gate.as_str(),
                "Review decision applied"
            );
            Ok(DecisionOutcome::Applied(record))
        }
        Dispatched::Stale { record, .. } => Ok(DecisionOutcome::AlreadyResolved(record)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(workflow_id: &str, action: &str, phase: &str) -> DecisionRequest {
        DecisionRequest {
            workflow_id: workflow_id.to_string(),
            action: action.to_string(),
            phase: phase.to_string(),
            user_id: "U1".to_string(),
        }
    }

    #[test]
    fn validate_accepts_well_formed_requests() {
        let valid = request("wf-1", "accept", "plan_review").validate().unwrap();
        assert_eq!(valid.gate, ReviewGate::PlanReview);
        assert_eq!(valid.action, DecisionAction::Accept);
        assert_eq!(valid.user_id, "U1");
    }

    #[test]
    fn validate_rejects_missing_or_unknown_fields() {
        for bad in [
            request("", "accept", "plan_review"),
            request("wf-1", "approve", "plan_review"),
            request("wf-1", "reject", "implementing"),
        ] {
            assert!(matches!(bad.validate(), Err(WorkflowError::Validation(_))));
        }
    }

    #[test]
    fn missing_user_is_recorded_as_unknown() {
        let mut req = request("wf-1", "reject", "context_review");
        req.user_id = "  ".to_string();
        assert_eq!(req.validate().unwrap().user_id, "unknown");
    }
}
