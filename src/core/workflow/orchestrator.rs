//! Read, transition, conditionally write, then act.
//!
//! Every state change goes through [`Orchestrator::dispatch`]. The record is
//! re-read and the pure transition recomputed whenever the conditional write
//! loses, and side effects only run once a write has won.

use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::error::WorkflowError;
use super::machine::{self, Outcome, SideEffect, WorkflowEvent};
use super::prompts::{enriched_context, implementer_prompt, planner_prompt};
use super::types::{JobRole, LaunchRequest, Phase, WorkflowRecord};
use crate::core::remote::{LaunchParams, RemoteJobClient};
use crate::core::render::{CardContext, CardRenderer, ChatSink};
use crate::core::store::RecordStore;

pub const MAX_WRITE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    /// The event won a write. Holds the latest record after follow-up
    /// launches settled.
    Applied(WorkflowRecord),
    /// The event no longer applies; nothing was written.
    Stale {
        record: WorkflowRecord,
        reason: String,
    },
}

impl Dispatched {
    pub fn record(&self) -> &WorkflowRecord {
        match self {
            Dispatched::Applied(record) => record,
            Dispatched::Stale { record, .. } => record,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Dispatched::Applied(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchOutcome {
    pub record: WorkflowRecord,
    /// False when a workflow with the requested id already existed.
    pub created: bool,
}

/// Workflow ids with a launch in flight in this process.
struct LaunchClaim<'a> {
    launching: &'a Mutex<HashSet<String>>,
    workflow_id: String,
}

impl Drop for LaunchClaim<'_> {
    fn drop(&mut self) {
        self.launching
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.workflow_id);
    }
}

pub struct Orchestrator {
    records: RecordStore,
    remote: Arc<dyn RemoteJobClient>,
    renderer: Arc<dyn CardRenderer>,
    sink: Arc<dyn ChatSink>,
    launching: Mutex<HashSet<String>>,
}

impl Orchestrator {
    pub fn new(
        records: RecordStore,
        remote: Arc<dyn RemoteJobClient>,
        renderer: Arc<dyn CardRenderer>,
        sink: Arc<dyn ChatSink>,
    ) -> Self {
        Self {
            records,
            remote,
            renderer,
            sink,
            launching: Mutex::new(HashSet::new()),
        }
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn remote(&self) -> &Arc<dyn RemoteJobClient> {
        &self.remote
    }

    pub async fn get(&self, workflow_id: &str) -> Result<WorkflowRecord, WorkflowError> {
        self.records
            .get_workflow(workflow_id)
            .await
            .map_err(WorkflowError::Store)?
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))
    }

    /// Creates the workflow record and starts it.
    ///
    /// With context review the workflow parks immediately and no remote job
    /// is started. Re-launching an existing id returns the stored record.
    pub async fn launch(&self, request: LaunchRequest) -> Result<LaunchOutcome, WorkflowError> {
        for (field, value) in [
            ("channel_id", &request.channel_id),
            ("user_id", &request.user_id),
            ("repository", &request.repository),
            ("prompt", &request.prompt),
        ] {
            if value.trim().is_empty() {
                return Err(WorkflowError::Validation(format!("{} is required", field)));
            }
        }

        let workflow_id = request
            .workflow_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let now = Utc::now();
        let context_review = request.review_gates.context_review;
        let record = WorkflowRecord {
            workflow_id: workflow_id.clone(),
            channel_id: request.channel_id,
            launching_user_id: request.user_id,
            thread_ts: request.thread_ts,
            repository: request.repository.trim().to_string(),
            branch: request.branch.trim().to_string(),
            model_name: request.model_name.trim().to_string(),
            pending_review_payload: context_review.then(|| {
                enriched_context(
                    &request.repository,
                    &request.branch,
                    &request.model_name,
                    &request.prompt,
                )
            }),
            prompt: request.prompt,
            review_gates: request.review_gates,
            phase: if context_review {
                Phase::ContextReview
            } else {
                Phase::LaunchedPlanning
            },
            active_job_id: None,
            job_role: None,
            iteration_count: 1,
            last_known_remote_status: None,
            plan_text: None,
            resolved_reviews: Vec::new(),
            decided_by: None,
            result_summary: None,
            failure_reason: None,
            decision_lock_token: 0,
            created_at: now,
            updated_at: now,
        };

        let Some(created) = self
            .records
            .create_workflow(&record)
            .await
            .map_err(WorkflowError::Store)?
        else {
            debug!(workflow_id = %workflow_id, "Launch for existing workflow ignored");
            return Ok(LaunchOutcome {
                record: self.get(&workflow_id).await?,
                created: false,
            });
        };

        info!(
            workflow_id = %workflow_id,
            repository = %created.repository,
            phase = %created.phase,
            "Workflow launched"
        );

        let effects = if context_review {
            vec![SideEffect::RenderCard]
        } else {
            vec![
                SideEffect::LaunchJob {
                    role: JobRole::Planner,
                    prompt: planner_prompt(&created, None),
                },
                SideEffect::RenderCard,
            ]
        };
        let record = self.run_effects(created, effects).await;
        Ok(LaunchOutcome {
            record,
            created: true,
        })
    }

    /// Applies `event` to the workflow and executes the resulting effects.
    pub async fn dispatch(
        &self,
        workflow_id: &str,
        event: WorkflowEvent,
    ) -> Result<Dispatched, WorkflowError> {
        match self.transition(workflow_id, &event).await? {
            (Dispatched::Applied(record), effects) => {
                Ok(Dispatched::Applied(self.run_effects(record, effects).await))
            }
            (stale, _) => Ok(stale),
        }
    }

    /// Launches the job a workflow is still waiting for, if any.
    ///
    /// Picks up records left in an accepted phase after the launch result
    /// could not be written. Returns `None` when nothing was launched here.
    pub async fn resume_launch(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowRecord>, WorkflowError> {
        let Some(claim) = self.claim_launch(workflow_id) else {
            return Ok(None);
        };
        let record = self.get(workflow_id).await?;
        let Some(role) = record.awaits_launch() else {
            return Ok(None);
        };
        info!(
            workflow_id,
            phase = %record.phase,
            role = role.as_str(),
            "Resuming launch"
        );
        let prompt = match role {
            JobRole::Planner => planner_prompt(&record, None),
            JobRole::Implementer => implementer_prompt(&record),
        };
        let (record, effects) = self.launch_claimed(record, role, prompt).await;
        drop(claim);
        Ok(Some(self.run_effects(record, effects).await))
    }

    fn claim_launch(&self, workflow_id: &str) -> Option<LaunchClaim<'_>> {
        let mut launching = self.launching.lock().unwrap_or_else(|e| e.into_inner());
        if !launching.insert(workflow_id.to_string()) {
            return None;
        }
        Some(LaunchClaim {
            launching: &self.launching,
            workflow_id: workflow_id.to_string(),
        })
    }

    async fn transition(
        &self,
        workflow_id: &str,
        event: &WorkflowEvent,
    ) -> Result<(Dispatched, Vec<SideEffect>), WorkflowError> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self.get(workflow_id).await?;
            match machine::apply(&current, event)? {
                Outcome::Stale(reason) => {
                    debug!(
                        workflow_id,
                        event = event.kind(),
                        "Stale event: {}",
                        reason
                    );
                    return Ok((
                        Dispatched::Stale {
                            record: current,
                            reason,
                        },
                        Vec::new(),
                    ));
                }
                Outcome::Advanced { record, effects } => {
                    match self
                        .records
                        .save_workflow(&record)
                        .await
                        .map_err(WorkflowError::Store)?
                    {
                        Some(saved) => {
                            info!(
                                workflow_id,
                                event = event.kind(),
                                from = %current.phase,
                                to = %saved.phase,
                                "Workflow advanced"
                            );
                            return Ok((Dispatched::Applied(saved), effects));
                        }
                        None => {
                            debug!(
                                workflow_id,
                                attempt,
                                event = event.kind(),
                                "Write conflict, retrying"
                            );
                        }
                    }
                }
            }
        }
        warn!(
            workflow_id,
            event = event.kind(),
            "Giving up after {} conflicting writes",
            MAX_WRITE_ATTEMPTS
        );
        Err(WorkflowError::Conflict {
            workflow_id: workflow_id.to_string(),
            attempts: MAX_WRITE_ATTEMPTS,
        })
    }

    /// Executes effects in order. Launch results are fed back through
    /// `transition`, and their own effects join the queue.
    async fn run_effects(
        &self,
        mut record: WorkflowRecord,
        effects: Vec<SideEffect>,
    ) -> WorkflowRecord {
        let mut queue: VecDeque<SideEffect> = effects.into();
        let mut rendered_token = None;

        while let Some(effect) = queue.pop_front() {
            match effect {
                SideEffect::LaunchJob { role, prompt } => {
                    let Some(_claim) = self.claim_launch(&record.workflow_id) else {
                        debug!(
                            workflow_id = %record.workflow_id,
                            "Launch already in flight, skipping"
                        );
                        continue;
                    };
                    let (next, more) = self.launch_claimed(record, role, prompt).await;
                    record = next;
                    queue.extend(more);
                }
                SideEffect::StopJob { job_id } => {
                    if let Err(e) = self.remote.stop(&job_id).await {
                        warn!(
                            workflow_id = %record.workflow_id,
                            job_id = %job_id,
                            "Remote stop failed: {}",
                            e
                        );
                    }
                }
                SideEffect::MirrorAgent {
                    job_id,
                    role,
                    status,
                } => {
                    if let Err(e) = self
                        .records
                        .upsert_agent(&job_id, &record.workflow_id, role, status)
                        .await
                    {
                        warn!(job_id = %job_id, "Failed to mirror agent status: {}", e);
                    }
                }
                SideEffect::RenderCard => {
                    // One card per persisted version is enough.
                    if rendered_token != Some(record.decision_lock_token) {
                        rendered_token = Some(record.decision_lock_token);
                        self.render(&record).await;
                    }
                }
            }
        }
        record
    }

    /// Starts the remote job and records the result. A job the record no
    /// longer wants is stopped again. Callers hold the launch claim.
    async fn launch_claimed(
        &self,
        record: WorkflowRecord,
        role: JobRole,
        prompt: String,
    ) -> (WorkflowRecord, Vec<SideEffect>) {
        let follow_up = self.launch_job(&record, role, prompt).await;
        match self.transition(&record.workflow_id, &follow_up).await {
            Ok((Dispatched::Applied(next), more)) => (next, more),
            Ok((Dispatched::Stale { record: latest, .. }, _)) => {
                self.stop_orphan(&latest.workflow_id, &follow_up).await;
                (latest, Vec::new())
            }
            Err(e) => {
                warn!(
                    workflow_id = %record.workflow_id,
                    "Could not record launch result, the poller will retry: {}",
                    e
                );
                self.stop_orphan(&record.workflow_id, &follow_up).await;
                (record, Vec::new())
            }
        }
    }

    async fn launch_job(&self, record: &WorkflowRecord, role: JobRole, prompt: String) -> WorkflowEvent {
        let params = LaunchParams {
            repository: record.repository.clone(),
            branch: record.branch.clone(),
            model_name: record.model_name.clone(),
            prompt,
        };
        match self.remote.create(&params).await {
            Ok(job_id) => {
                info!(
                    workflow_id = %record.workflow_id,
                    job_id = %job_id,
                    role = role.as_str(),
                    "Remote job launched"
                );
                WorkflowEvent::JobLaunched { role, job_id }
            }
            Err(e) => {
                warn!(
                    workflow_id = %record.workflow_id,
                    role = role.as_str(),
                    "Remote launch failed: {}",
                    e
                );
                WorkflowEvent::LaunchFailed {
                    role,
                    error: format!("{:#}", e),
                }
            }
        }
    }

    async fn stop_orphan(&self, workflow_id: &str, event: &WorkflowEvent) {
        let WorkflowEvent::JobLaunched { job_id, .. } = event else {
            return;
        };
        warn!(workflow_id, job_id = %job_id, "Stopping job nobody is waiting for");
        if let Err(e) = self.remote.stop(job_id).await {
            warn!(workflow_id, job_id = %job_id, "Remote stop failed: {}", e);
        }
    }

    async fn render(&self, record: &WorkflowRecord) {
        let card = self.renderer.render(
            record.phase,
            record.pending_review_payload.as_deref(),
            &CardContext::from_record(record),
        );
        if let Err(e) = self
            .sink
            .publish(&record.channel_id, record.thread_ts.as_deref(), &card)
            .await
        {
            warn!(
                workflow_id = %record.workflow_id,
                "Failed to publish card: {}",
                e
            );
        }
    }
}
