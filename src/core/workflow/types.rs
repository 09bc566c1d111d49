use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    LaunchedPlanning,
    ContextReview,
    ContextAccepted,
    ContextRejected,
    PlanRunning,
    PlanReview,
    PlanAccepted,
    PlanRejected,
    Implementing,
    Finished,
    Failed,
    Stopped,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::LaunchedPlanning => "launched_planning",
            Phase::ContextReview => "context_review",
            Phase::ContextAccepted => "context_accepted",
            Phase::ContextRejected => "context_rejected",
            Phase::PlanRunning => "plan_running",
            Phase::PlanReview => "plan_review",
            Phase::PlanAccepted => "plan_accepted",
            Phase::PlanRejected => "plan_rejected",
            Phase::Implementing => "implementing",
            Phase::Finished => "finished",
            Phase::Failed => "failed",
            Phase::Stopped => "stopped",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "launched_planning" => Some(Phase::LaunchedPlanning),
            "context_review" => Some(Phase::ContextReview),
            "context_accepted" => Some(Phase::ContextAccepted),
            "context_rejected" => Some(Phase::ContextRejected),
            "plan_running" => Some(Phase::PlanRunning),
            "plan_review" => Some(Phase::PlanReview),
            "plan_accepted" => Some(Phase::PlanAccepted),
            "plan_rejected" => Some(Phase::PlanRejected),
            "implementing" => Some(Phase::Implementing),
            "finished" => Some(Phase::Finished),
            "failed" => Some(Phase::Failed),
            "stopped" => Some(Phase::Stopped),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Phase::Finished
                | Phase::Failed
                | Phase::Stopped
                | Phase::ContextRejected
                | Phase::PlanRejected
        )
    }

    /// Phases in which a remote job represents the workflow.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            Phase::LaunchedPlanning | Phase::PlanRunning | Phase::Implementing
        )
    }

    /// The review gate parked in this phase, if any.
    pub fn review_gate(self) -> Option<ReviewGate> {
        match self {
            Phase::ContextReview => Some(ReviewGate::ContextReview),
            Phase::PlanReview => Some(ReviewGate::PlanReview),
            _ => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human approval points a workflow can be parked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewGate {
    ContextReview,
    PlanReview,
}

impl ReviewGate {
    pub fn review_phase(self) -> Phase {
        match self {
            ReviewGate::ContextReview => Phase::ContextReview,
            ReviewGate::PlanReview => Phase::PlanReview,
        }
    }

    pub fn accepted_phase(self) -> Phase {
        match self {
            ReviewGate::ContextReview => Phase::ContextAccepted,
            ReviewGate::PlanReview => Phase::PlanAccepted,
        }
    }

    pub fn rejected_phase(self) -> Phase {
        match self {
            ReviewGate::ContextReview => Phase::ContextRejected,
            ReviewGate::PlanReview => Phase::PlanRejected,
        }
    }

    /// Role of the job launched once this gate is accepted.
    pub fn next_role(self) -> JobRole {
        match self {
            ReviewGate::ContextReview => JobRole::Planner,
            ReviewGate::PlanReview => JobRole::Implementer,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.review_phase().as_str()
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "context_review" => Some(ReviewGate::ContextReview),
            "plan_review" => Some(ReviewGate::PlanReview),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Accept,
    Reject,
}

impl DecisionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionAction::Accept => "accept",
            DecisionAction::Reject => "reject",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "accept" => Some(DecisionAction::Accept),
            "reject" => Some(DecisionAction::Reject),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRole {
    Planner,
    Implementer,
}

impl JobRole {
    pub fn as_str(self) -> &'static str {
        match self {
            JobRole::Planner => "planner",
            JobRole::Implementer => "implementer",
        }
    }
}

/// Status vocabulary of the remote job service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteStatus {
    Creating,
    Running,
    Finished,
    Failed,
    Stopped,
}

impl RemoteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RemoteStatus::Creating => "CREATING",
            RemoteStatus::Running => "RUNNING",
            RemoteStatus::Finished => "FINISHED",
            RemoteStatus::Failed => "FAILED",
            RemoteStatus::Stopped => "STOPPED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CREATING" => Some(RemoteStatus::Creating),
            "RUNNING" => Some(RemoteStatus::Running),
            "FINISHED" => Some(RemoteStatus::Finished),
            "FAILED" | "ERROR" => Some(RemoteStatus::Failed),
            "STOPPED" | "EXPIRED" => Some(RemoteStatus::Stopped),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RemoteStatus::Finished | RemoteStatus::Failed | RemoteStatus::Stopped
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct ReviewGates {
    #[serde(default)]
    pub context_review: bool,
    #[serde(default)]
    pub plan_review: bool,
}

impl ReviewGates {
    pub fn is_enabled(&self, gate: ReviewGate) -> bool {
        match gate {
            ReviewGate::ContextReview => self.context_review,
            ReviewGate::PlanReview => self.plan_review,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WorkflowRecord {
    pub workflow_id: String,
    pub channel_id: String,
    pub launching_user_id: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    pub repository: String,
    pub branch: String,
    pub model_name: String,
    pub prompt: String,
    pub review_gates: ReviewGates,
    pub phase: Phase,
    #[serde(default)]
    pub active_job_id: Option<String>,
    #[serde(default)]
    pub job_role: Option<JobRole>,
    pub iteration_count: u32,
    #[serde(default)]
    pub last_known_remote_status: Option<RemoteStatus>,
    #[serde(default)]
    pub pending_review_payload: Option<String>,
    #[serde(default)]
    pub plan_text: Option<String>,
    #[serde(default)]
    pub resolved_reviews: Vec<ReviewGate>,
    #[serde(default)]
    pub decided_by: Option<String>,
    #[serde(default)]
    pub result_summary: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub decision_lock_token: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRecord {
    pub fn has_active_job(&self) -> bool {
        self.active_job_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    pub fn has_pending_review(&self) -> bool {
        self.pending_review_payload
            .as_deref()
            .is_some_and(|p| !p.is_empty())
    }

    pub fn is_resolved(&self, gate: ReviewGate) -> bool {
        self.resolved_reviews.contains(&gate)
    }

    /// The role of the job this record is waiting to have launched, if any.
    ///
    /// Accepted phases always await a launch. Running phases await one only
    /// between the winning transition write and the launch result.
    pub fn awaits_launch(&self) -> Option<JobRole> {
        match self.phase {
            Phase::ContextAccepted => Some(JobRole::Planner),
            Phase::PlanAccepted => Some(JobRole::Implementer),
            Phase::LaunchedPlanning | Phase::PlanRunning if !self.has_active_job() => {
                Some(JobRole::Planner)
            }
            Phase::Implementing if !self.has_active_job() => Some(JobRole::Implementer),
            _ => None,
        }
    }

    /// Checks that the phase agrees with the job/review fields.
    pub fn check_invariants(&self) -> Result<(), String> {
        let job = self.has_active_job();
        let review = self.has_pending_review();
        if job && review {
            return Err(format!(
                "workflow {} has both an active job and a pending review",
                self.workflow_id
            ));
        }
        if job && !self.phase.is_running() {
            return Err(format!(
                "workflow {} has an active job in phase {}",
                self.workflow_id, self.phase
            ));
        }
        if review && self.phase.review_gate().is_none() {
            return Err(format!(
                "workflow {} has a pending review in phase {}",
                self.workflow_id, self.phase
            ));
        }
        if self.phase.review_gate().is_some() && !review {
            return Err(format!(
                "workflow {} is in review without a payload",
                self.workflow_id
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AgentRecord {
    pub job_id: String,
    pub status: RemoteStatus,
    pub workflow_id: String,
    pub role: JobRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for launching a new workflow.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub workflow_id: Option<String>,
    pub channel_id: String,
    pub user_id: String,
    pub thread_ts: Option<String>,
    pub repository: String,
    pub branch: String,
    pub model_name: String,
    pub prompt: String,
    pub review_gates: ReviewGates,
}
