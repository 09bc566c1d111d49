use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{DurableStore, PutOutcome};
use crate::core::workflow::types::{AgentRecord, JobRole, RemoteStatus, WorkflowRecord};

const WORKFLOW_PREFIX: &str = "workflow:";
const AGENT_PREFIX: &str = "agent:";
/// Index of workflows that have not reached a terminal phase.
const OPEN_PREFIX: &str = "open:";
const MIRROR_ATTEMPTS: usize = 3;

fn workflow_key(workflow_id: &str) -> String {
    format!("{}{}", WORKFLOW_PREFIX, workflow_id)
}

fn agent_key(job_id: &str) -> String {
    format!("{}{}", AGENT_PREFIX, job_id)
}

fn open_key(workflow_id: &str) -> String {
    format!("{}{}", OPEN_PREFIX, workflow_id)
}

/// Typed view over a [`DurableStore`].
///
/// `decision_lock_token` on a returned record is always the store version it
/// was read at, so passing the record back to [`RecordStore::save_workflow`]
/// performs a conditional write against exactly that read.
#[derive(Clone)]
pub struct RecordStore {
    store: Arc<dyn DurableStore>,
}

impl RecordStore {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    pub async fn get_workflow(&self, workflow_id: &str) -> Result<Option<WorkflowRecord>> {
        let Some(entry) = self.store.get(&workflow_key(workflow_id)).await? else {
            return Ok(None);
        };
        let mut record: WorkflowRecord = serde_json::from_str(&entry.value)
            .with_context(|| format!("corrupt workflow record {}", workflow_id))?;
        record.decision_lock_token = entry.version;
        Ok(Some(record))
    }

    /// Insert-only. Returns `None` when a record with the same id exists.
    pub async fn create_workflow(&self, record: &WorkflowRecord) -> Result<Option<WorkflowRecord>> {
        let mut stored = record.clone();
        stored.decision_lock_token = 1;
        let json = serde_json::to_string(&stored)?;
        if !record.phase.is_terminal() {
            // Written first so an open record is never missing from the index.
            self.store
                .put(&open_key(&record.workflow_id), "", None)
                .await?;
        }
        match self
            .store
            .put(&workflow_key(&record.workflow_id), &json, None)
            .await?
        {
            PutOutcome::Written { version } => {
                stored.decision_lock_token = version;
                Ok(Some(stored))
            }
            PutOutcome::Conflict => Ok(None),
        }
    }

    /// Conditional write against `record.decision_lock_token`.
    ///
    /// Returns the persisted record (new token, fresh `updated_at`) or `None`
    /// if another writer got there first.
    pub async fn save_workflow(&self, record: &WorkflowRecord) -> Result<Option<WorkflowRecord>> {
        let expected = record.decision_lock_token;
        let mut stored = record.clone();
        stored.decision_lock_token = expected + 1;
        stored.updated_at = Utc::now();
        let json = serde_json::to_string(&stored)?;
        match self
            .store
            .put(&workflow_key(&record.workflow_id), &json, Some(expected))
            .await?
        {
            PutOutcome::Written { version } => {
                stored.decision_lock_token = version;
                if stored.phase.is_terminal() {
                    self.close(&stored.workflow_id).await;
                }
                Ok(Some(stored))
            }
            PutOutcome::Conflict => {
                debug!(
                    workflow_id = %record.workflow_id,
                    expected, "Conditional workflow write lost"
                );
                Ok(None)
            }
        }
    }

    async fn all_workflows(&self) -> Result<Vec<WorkflowRecord>> {
        let entries = self.store.list_by_prefix(WORKFLOW_PREFIX).await?;
        let mut out = Vec::with_capacity(entries.len());
        for (key, entry) in entries {
            match serde_json::from_str::<WorkflowRecord>(&entry.value) {
                Ok(mut record) => {
                    record.decision_lock_token = entry.version;
                    out.push(record);
                }
                Err(e) => warn!("Skipping unreadable record {}: {}", key, e),
            }
        }
        Ok(out)
    }

    /// Most recently created first.
    pub async fn list_workflows(&self, limit: usize) -> Result<Vec<WorkflowRecord>> {
        let mut records = self.all_workflows().await?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }

    /// Ids of workflows that have not reached a terminal phase.
    ///
    /// Reads only the open index, so the cost tracks live workflows rather
    /// than history.
    pub async fn list_open(&self) -> Result<Vec<String>> {
        let entries = self.store.list_by_prefix(OPEN_PREFIX).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, _)| key.strip_prefix(OPEN_PREFIX).map(str::to_string))
            .collect())
    }

    /// Reads a workflow listed by [`RecordStore::list_open`]. Ids whose
    /// record is gone or terminal are dropped from the index and yield `None`.
    pub async fn get_open_workflow(&self, workflow_id: &str) -> Result<Option<WorkflowRecord>> {
        match self.get_workflow(workflow_id).await? {
            Some(record) if !record.phase.is_terminal() => Ok(Some(record)),
            _ => {
                self.close(workflow_id).await;
                Ok(None)
            }
        }
    }

    /// Terminal phases are absorbing, so a closed id never needs reopening.
    async fn close(&self, workflow_id: &str) {
        if let Err(e) = self.store.delete(&open_key(workflow_id)).await {
            warn!(workflow_id, "Failed to drop workflow from open index: {}", e);
        }
    }

    #[cfg(test)]
    pub async fn get_agent(&self, job_id: &str) -> Result<Option<AgentRecord>> {
        let Some(entry) = self.store.get(&agent_key(job_id)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&entry.value)?))
    }

    /// Creates or updates the mirror of a remote job.
    ///
    /// A terminal agent record is never rewritten; returns whether a write
    /// happened.
    pub async fn upsert_agent(
        &self,
        job_id: &str,
        workflow_id: &str,
        role: JobRole,
        status: RemoteStatus,
    ) -> Result<bool> {
        let key = agent_key(job_id);
        for _ in 0..MIRROR_ATTEMPTS {
            let now = Utc::now();
            let (record, expected) = match self.store.get(&key).await? {
                Some(entry) => {
                    let existing: AgentRecord = serde_json::from_str(&entry.value)?;
                    if existing.status.is_terminal() || existing.status == status {
                        return Ok(false);
                    }
                    (
                        AgentRecord {
                            status,
                            updated_at: now,
                            ..existing
                        },
                        Some(entry.version),
                    )
                }
                None => (
                    AgentRecord {
                        job_id: job_id.to_string(),
                        status,
                        workflow_id: workflow_id.to_string(),
                        role,
                        created_at: now,
                        updated_at: now,
                    },
                    None,
                ),
            };
            let json = serde_json::to_string(&record)?;
            if let PutOutcome::Written { .. } = self.store.put(&key, &json, expected).await? {
                return Ok(true);
            }
        }
        warn!(job_id, "Gave up mirroring agent status after repeated conflicts");
        Ok(false)
    }

    pub async fn list_agents(&self, active_only: bool) -> Result<Vec<AgentRecord>> {
        let entries = self.store.list_by_prefix(AGENT_PREFIX).await?;
        let mut out = Vec::new();
        for (key, entry) in entries {
            match serde_json::from_str::<AgentRecord>(&entry.value) {
                Ok(agent) => {
                    if !active_only || !agent.status.is_terminal() {
                        out.push(agent);
                    }
                }
                Err(e) => warn!("Skipping unreadable record {}: {}", key, e),
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    pub async fn count_active_agents(&self) -> Result<usize> {
        Ok(self.list_agents(true).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::SqliteStore;
    use crate::core::workflow::types::{Phase, ReviewGates};

    fn records() -> RecordStore {
        RecordStore::new(Arc::new(SqliteStore::open_in_memory().unwrap()))
    }

    fn sample(id: &str) -> WorkflowRecord {
        let now = Utc::now();
        WorkflowRecord {
            workflow_id: id.to_string(),
            channel_id: "C1".to_string(),
            launching_user_id: "U1".to_string(),
            thread_ts: None,
            repository: "acme/widgets".to_string(),
            branch: "main".to_string(),
            model_name: "auto".to_string(),
            prompt: "add a widget".to_string(),
            review_gates: ReviewGates {
                context_review: false,
                plan_review: true,
            },
            phase: Phase::LaunchedPlanning,
            active_job_id: Some("job-1".to_string()),
            job_role: Some(JobRole::Planner),
            iteration_count: 1,
            last_known_remote_status: Some(RemoteStatus::Creating),
            pending_review_payload: None,
            plan_text: None,
            resolved_reviews: Vec::new(),
            decided_by: None,
            result_summary: None,
            failure_reason: None,
            decision_lock_token: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn create_is_insert_only() {
        let store = records();
        let created = store.create_workflow(&sample("wf-1")).await.unwrap();
        assert_eq!(created.unwrap().decision_lock_token, 1);

        let mut dup = sample("wf-1");
        dup.prompt = "something else".to_string();
        assert!(store.create_workflow(&dup).await.unwrap().is_none());

        let stored = store.get_workflow("wf-1").await.unwrap().unwrap();
        assert_eq!(stored.prompt, "add a widget");
    }

    #[tokio::test]
    async fn save_bumps_token_and_rejects_stale_copy() {
        let store = records();
        let first = store.create_workflow(&sample("wf-1")).await.unwrap().unwrap();
        let stale = first.clone();

        let mut next = first.clone();
        next.phase = Phase::PlanRunning;
        let saved = store.save_workflow(&next).await.unwrap().unwrap();
        assert_eq!(saved.decision_lock_token, 2);

        let mut loser = stale;
        loser.phase = Phase::Stopped;
        assert!(store.save_workflow(&loser).await.unwrap().is_none());

        let stored = store.get_workflow("wf-1").await.unwrap().unwrap();
        assert_eq!(stored.phase, Phase::PlanRunning);
        assert_eq!(stored.decision_lock_token, 2);
    }

    #[tokio::test]
    async fn round_trip_preserves_every_field() {
        let store = records();
        let mut record = sample("wf-rt");
        record.thread_ts = Some("1700000000.000100".to_string());
        record.plan_text = Some("1. do it".to_string());
        record.resolved_reviews = vec![crate::core::workflow::types::ReviewGate::ContextReview];
        record.decided_by = Some("U2".to_string());
        let created = store.create_workflow(&record).await.unwrap().unwrap();

        let read = store.get_workflow("wf-rt").await.unwrap().unwrap();
        assert_eq!(read, created);
    }

    #[tokio::test]
    async fn open_index_drops_workflows_once_terminal() {
        let kv = Arc::new(SqliteStore::open_in_memory().unwrap());
        let store = RecordStore::new(kv.clone());
        for id in ["wf-a", "wf-b", "wf-c"] {
            store.create_workflow(&sample(id)).await.unwrap();
        }
        assert_eq!(store.list_open().await.unwrap(), vec!["wf-a", "wf-b", "wf-c"]);

        let mut done = store.get_workflow("wf-b").await.unwrap().unwrap();
        done.phase = Phase::Finished;
        done.active_job_id = None;
        done.job_role = None;
        store.save_workflow(&done).await.unwrap().unwrap();

        assert_eq!(store.list_open().await.unwrap(), vec!["wf-a", "wf-c"]);
        assert_eq!(kv.list_by_prefix("open:").await.unwrap().len(), 2);
        // History stays readable.
        assert_eq!(store.list_workflows(10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn stale_open_entries_are_pruned_on_read() {
        let kv = Arc::new(SqliteStore::open_in_memory().unwrap());
        let store = RecordStore::new(kv.clone());
        store.create_workflow(&sample("wf-live")).await.unwrap();
        kv.put("open:wf-ghost", "", None).await.unwrap();

        assert!(store.get_open_workflow("wf-ghost").await.unwrap().is_none());
        assert!(store.get_open_workflow("wf-live").await.unwrap().is_some());
        assert_eq!(store.list_open().await.unwrap(), vec!["wf-live"]);
    }

    #[tokio::test]
    async fn terminal_record_is_never_indexed() {
        let store = records();
        let mut rejected = sample("wf-x");
        rejected.phase = Phase::ContextRejected;
        rejected.active_job_id = None;
        rejected.job_role = None;
        store.create_workflow(&rejected).await.unwrap();
        assert!(store.list_open().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn terminal_agent_record_is_never_rewritten() {
        let store = records();
        assert!(
            store
                .upsert_agent("job-1", "wf-1", JobRole::Planner, RemoteStatus::Running)
                .await
                .unwrap()
        );
        assert!(
            store
                .upsert_agent("job-1", "wf-1", JobRole::Planner, RemoteStatus::Finished)
                .await
                .unwrap()
        );
        assert!(
            !store
                .upsert_agent("job-1", "wf-1", JobRole::Planner, RemoteStatus::Running)
                .await
                .unwrap()
        );

        let agent = store.get_agent("job-1").await.unwrap().unwrap();
        assert_eq!(agent.status, RemoteStatus::Finished);
        assert_eq!(store.count_active_agents().await.unwrap(), 0);
    }
}
