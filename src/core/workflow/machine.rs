//! Pure workflow transitions.
//!
//! `apply` never performs I/O. It returns the next record together with the
//! side effects the caller must execute once that record has been persisted.

use super::prompts::{EMPTY_PLAN_PLACEHOLDER, implementer_prompt, planner_prompt};
use super::types::{DecisionAction, JobRole, Phase, RemoteStatus, ReviewGate, WorkflowRecord};

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    RemoteStatusChanged {
        job_id: String,
        status: RemoteStatus,
        summary: Option<String>,
    },
    UserDecision {
        gate: ReviewGate,
        action: DecisionAction,
        user_id: String,
    },
    RevisionRequested {
        user_id: String,
        feedback: String,
    },
    JobLaunched {
        role: JobRole,
        job_id: String,
    },
    LaunchFailed {
        role: JobRole,
        error: String,
    },
    StopRequested {
        user_id: String,
    },
}

impl WorkflowEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowEvent::RemoteStatusChanged { .. } => "remote_status_changed",
            WorkflowEvent::UserDecision { .. } => "user_decision",
            WorkflowEvent::RevisionRequested { .. } => "revision_requested",
            WorkflowEvent::JobLaunched { .. } => "job_launched",
            WorkflowEvent::LaunchFailed { .. } => "launch_failed",
            WorkflowEvent::StopRequested { .. } => "stop_requested",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    LaunchJob { role: JobRole, prompt: String },
    StopJob { job_id: String },
    RenderCard,
    MirrorAgent {
        job_id: String,
        role: JobRole,
        status: RemoteStatus,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Advanced {
        record: WorkflowRecord,
        effects: Vec<SideEffect>,
    },
    /// Nothing to do: the event was already honored or no longer applies.
    Stale(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("{0}")]
    Invalid(String),
}

pub fn apply(record: &WorkflowRecord, event: &WorkflowEvent) -> Result<Outcome, TransitionError> {
    match event {
        WorkflowEvent::RemoteStatusChanged {
            job_id,
            status,
            summary,
        } => on_remote_status(record, job_id, *status, summary.as_deref()),
        WorkflowEvent::UserDecision {
            gate,
            action,
            user_id,
        } => on_decision(record, *gate, *action, user_id),
        WorkflowEvent::RevisionRequested { user_id, feedback } => {
            on_revision(record, user_id, feedback)
        }
        WorkflowEvent::JobLaunched { role, job_id } => on_job_launched(record, *role, job_id),
        WorkflowEvent::LaunchFailed { role, error } => on_launch_failed(record, *role, error),
        WorkflowEvent::StopRequested { user_id } => on_stop(record, user_id),
    }
}

fn clear_job(record: &mut WorkflowRecord) {
    record.active_job_id = None;
    record.job_role = None;
}

fn on_remote_status(
    record: &WorkflowRecord,
    job_id: &str,
    status: RemoteStatus,
    summary: Option<&str>,
) -> Result<Outcome, TransitionError> {
    if record.phase.is_terminal() {
        return Ok(Outcome::Stale(format!("workflow already {}", record.phase)));
    }
    if record.active_job_id.as_deref() != Some(job_id) {
        return Ok(Outcome::Stale(format!("job {} is not the active job", job_id)));
    }
    if record.last_known_remote_status == Some(status) {
        return Ok(Outcome::Stale(format!("job {} still {}", job_id, status.as_str())));
    }
    let Some(role) = record.job_role else {
        return Err(TransitionError::Invalid(format!(
            "active job {} has no role",
            job_id
        )));
    };

    let mut next = record.clone();
    next.last_known_remote_status = Some(status);
    let mut effects = vec![SideEffect::MirrorAgent {
        job_id: job_id.to_string(),
        role,
        status,
    }];

    match (status, role) {
        (RemoteStatus::Creating | RemoteStatus::Running, _) => {
            effects.push(SideEffect::RenderCard);
        }
        (RemoteStatus::Finished, JobRole::Planner) => {
            clear_job(&mut next);
            let plan = summary
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(EMPTY_PLAN_PLACEHOLDER)
                .to_string();
            next.plan_text = Some(plan.clone());
            if record.review_gates.plan_review {
                next.phase = Phase::PlanReview;
                next.pending_review_payload = Some(plan);
                effects.push(SideEffect::RenderCard);
            } else {
                // No human gate: go straight to implementation.
                next.phase = Phase::Implementing;
                effects.push(SideEffect::LaunchJob {
                    role: JobRole::Implementer,
                    prompt: implementer_prompt(&next),
                });
            }
        }
        (RemoteStatus::Finished, JobRole::Implementer) => {
            clear_job(&mut next);
            next.phase = Phase::Finished;
            next.result_summary = summary
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            effects.push(SideEffect::RenderCard);
        }
        (RemoteStatus::Failed, _) => {
            clear_job(&mut next);
            next.phase = Phase::Failed;
            next.failure_reason = Some(format!("{} job {} failed", role.as_str(), job_id));
            effects.push(SideEffect::RenderCard);
        }
        (RemoteStatus::Stopped, _) => {
            clear_job(&mut next);
            next.phase = Phase::Stopped;
            effects.push(SideEffect::RenderCard);
        }
    }

    Ok(Outcome::Advanced {
        record: next,
        effects,
    })
}

fn on_decision(
    record: &WorkflowRecord,
    gate: ReviewGate,
    action: DecisionAction,
    user_id: &str,
) -> Result<Outcome, TransitionError> {
    if record.phase != gate.review_phase() {
        if record.phase.is_terminal() {
            return Ok(Outcome::Stale(format!(
                "workflow already {}",
                record.phase
            )));
        }
        if record.is_resolved(gate) {
            return Ok(Outcome::Stale(format!(
                "{} already resolved",
                gate.as_str()
            )));
        }
        return Err(TransitionError::Invalid(format!(
            "workflow is in {}, not {}",
            record.phase,
            gate.as_str()
        )));
    }

    let mut next = record.clone();
    next.pending_review_payload = None;
    if !next.resolved_reviews.contains(&gate) {
        next.resolved_reviews.push(gate);
    }
    next.decided_by = Some(user_id.to_string());

    let effects = match action {
        DecisionAction::Accept => {
            next.phase = gate.accepted_phase();
            let role = gate.next_role();
            let prompt = match role {
                JobRole::Planner => planner_prompt(&next, None),
                JobRole::Implementer => implementer_prompt(&next),
            };
            vec![SideEffect::LaunchJob { role, prompt }, SideEffect::RenderCard]
        }
        DecisionAction::Reject => {
            next.phase = gate.rejected_phase();
            vec![SideEffect::RenderCard]
        }
    };

    Ok(Outcome::Advanced {
        record: next,
        effects,
    })
}

fn on_revision(
    record: &WorkflowRecord,
    user_id: &str,
    feedback: &str,
) -> Result<Outcome, TransitionError> {
    if record.phase != Phase::PlanReview {
        if record.phase.is_terminal() || record.is_resolved(ReviewGate::PlanReview) {
            return Ok(Outcome::Stale("plan review already resolved".to_string()));
        }
        return Err(TransitionError::Invalid(format!(
            "revisions are only accepted during plan_review (workflow is in {})",
            record.phase
        )));
    }
    if feedback.trim().is_empty() {
        return Err(TransitionError::Invalid(
            "revision feedback is required".to_string(),
        ));
    }

    let mut next = record.clone();
    next.iteration_count = next.iteration_count.saturating_add(1);
    next.pending_review_payload = None;
    next.phase = Phase::PlanRunning;
    next.decided_by = Some(user_id.to_string());
    clear_job(&mut next);
    let prompt = planner_prompt(&next, Some(feedback));

    Ok(Outcome::Advanced {
        record: next,
        effects: vec![SideEffect::LaunchJob {
            role: JobRole::Planner,
            prompt,
        }],
    })
}

fn on_job_launched(
    record: &WorkflowRecord,
    role: JobRole,
    job_id: &str,
) -> Result<Outcome, TransitionError> {
    if record.awaits_launch() != Some(role) {
        return Ok(Outcome::Stale(format!(
            "workflow in {} is not waiting for a {} job",
            record.phase,
            role.as_str()
        )));
    }

    let mut next = record.clone();
    next.phase = match record.phase {
        Phase::ContextAccepted => Phase::PlanRunning,
        Phase::PlanAccepted => Phase::Implementing,
        other => other,
    };
    next.active_job_id = Some(job_id.to_string());
    next.job_role = Some(role);
    next.last_known_remote_status = Some(RemoteStatus::Creating);

    Ok(Outcome::Advanced {
        record: next,
        effects: vec![
            SideEffect::MirrorAgent {
                job_id: job_id.to_string(),
                role,
                status: RemoteStatus::Creating,
            },
            SideEffect::RenderCard,
        ],
    })
}

fn on_launch_failed(
    record: &WorkflowRecord,
    role: JobRole,
    error: &str,
) -> Result<Outcome, TransitionError> {
    if record.awaits_launch() != Some(role) {
        return Ok(Outcome::Stale(format!(
            "workflow in {} is not waiting for a {} job",
            record.phase,
            role.as_str()
        )));
    }

    let mut next = record.clone();
    next.phase = Phase::Failed;
    next.failure_reason = Some(format!("could not launch {} job: {}", role.as_str(), error));
    Ok(Outcome::Advanced {
        record: next,
        effects: vec![SideEffect::RenderCard],
    })
}

fn on_stop(record: &WorkflowRecord, user_id: &str) -> Result<Outcome, TransitionError> {
    if record.phase.is_terminal() {
        return Ok(Outcome::Stale(format!("workflow already {}", record.phase)));
    }

    let mut next = record.clone();
    let mut effects = Vec::new();
    if let Some(job_id) = record.active_job_id.clone().filter(|id| !id.is_empty()) {
        if let Some(role) = record.job_role {
            effects.push(SideEffect::MirrorAgent {
                job_id: job_id.clone(),
                role,
                status: RemoteStatus::Stopped,
            });
        }
        effects.push(SideEffect::StopJob { job_id });
    }
    clear_job(&mut next);
    next.pending_review_payload = None;
    next.phase = Phase::Stopped;
    next.result_summary = Some(format!("Stopped by {}", user_id));
    effects.push(SideEffect::RenderCard);

    Ok(Outcome::Advanced {
        record: next,
        effects,
    })
}
