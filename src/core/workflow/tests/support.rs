use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::metrics::RequestMetrics;
use crate::core::remote::{LaunchParams, RemoteJob, RemoteJobClient};
use crate::core::render::{CardContext, CardRenderer, ChatSink};
use crate::core::store::{DurableStore, PutOutcome, RecordStore, SqliteStore, Versioned};
use crate::core::workflow::types::{
    JobRole, LaunchRequest, Phase, RemoteStatus, ReviewGates, WorkflowRecord,
};
use crate::core::workflow::{Orchestrator, Poller};

// ── Remote ──

pub type CreateHook = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

#[derive(Default)]
pub struct FakeRemote {
    jobs: Mutex<HashMap<String, RemoteJob>>,
    failing: Mutex<HashSet<String>>,
    fail_create: AtomicBool,
    next_id: AtomicUsize,
    create_hook: Mutex<Option<CreateHook>>,
    pub launches: Mutex<Vec<LaunchParams>>,
    pub stopped: Mutex<Vec<String>>,
    pub get_calls: AtomicUsize,
}

impl FakeRemote {
    pub fn set_status(&self, job_id: &str, status: RemoteStatus, summary: Option<&str>) {
        self.jobs.lock().unwrap().insert(
            job_id.to_string(),
            RemoteJob {
                job_id: job_id.to_string(),
                status,
                summary: summary.map(str::to_string),
            },
        );
    }

    pub fn fail_status_for(&self, job_id: &str) {
        self.failing.lock().unwrap().insert(job_id.to_string());
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Runs `hook` inside the next `create`, after the job exists remotely
    /// but before its id is returned.
    pub fn on_next_create<F, Fut>(&self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self.create_hook.lock().unwrap() = Some(Box::new(move || Box::pin(hook())));
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    pub fn last_prompt(&self) -> String {
        self.launches
            .lock()
            .unwrap()
            .last()
            .map(|p| p.prompt.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RemoteJobClient for FakeRemote {
    async fn create(&self, params: &LaunchParams) -> Result<String> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(anyhow!("remote refused the job"));
        }
        let id = format!("job-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.launches.lock().unwrap().push(params.clone());
        self.set_status(&id, RemoteStatus::Creating, None);
        let hook = self.create_hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook().await;
        }
        Ok(id)
    }

    async fn get(&self, job_id: &str) -> Result<RemoteJob> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(job_id) {
            return Err(anyhow!("remote timed out"));
        }
        self.jobs
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown job {}", job_id))
    }

    async fn stop(&self, job_id: &str) -> Result<()> {
        self.stopped.lock().unwrap().push(job_id.to_string());
        self.set_status(job_id, RemoteStatus::Stopped, None);
        Ok(())
    }
}

// ── Rendering ──

/// Renders just enough to assert on: the phase and payload.
pub struct PhaseRenderer;

impl CardRenderer for PhaseRenderer {
    fn render(&self, phase: Phase, payload: Option<&str>, context: &CardContext) -> Value {
        json!({
            "workflow_id": context.workflow_id,
            "phase": phase.as_str(),
            "payload": payload,
        })
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub cards: Mutex<Vec<(String, Value)>>,
}

impl RecordingSink {
    pub fn count(&self) -> usize {
        self.cards.lock().unwrap().len()
    }

    pub fn phases_for(&self, workflow_id: &str) -> Vec<String> {
        self.cards
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, card)| card["workflow_id"] == workflow_id)
            .filter_map(|(_, card)| card["phase"].as_str().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl ChatSink for RecordingSink {
    async fn publish(&self, channel_id: &str, _thread_ts: Option<&str>, message: &Value) -> Result<()> {
        self.cards
            .lock()
            .unwrap()
            .push((channel_id.to_string(), message.clone()));
        Ok(())
    }
}

// ── Store ──

/// SQLite store that can be told to fail or to report conflicts.
pub struct FlakyStore {
    inner: SqliteStore,
    fail_keys: Mutex<HashSet<String>>,
    fail_value: Mutex<Option<String>>,
    forced_conflicts: AtomicUsize,
    pub puts: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory().unwrap(),
            fail_keys: Mutex::new(HashSet::new()),
            fail_value: Mutex::new(None),
            forced_conflicts: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
        }
    }

    pub fn fail_workflow(&self, workflow_id: &str) {
        self.fail_keys
            .lock()
            .unwrap()
            .insert(format!("workflow:{}", workflow_id));
    }

    /// The next put whose value contains `needle` fails once.
    pub fn fail_next_put_containing(&self, needle: &str) {
        *self.fail_value.lock().unwrap() = Some(needle.to_string());
    }

    pub fn heal(&self) {
        self.fail_keys.lock().unwrap().clear();
    }

    /// The next `n` conditional writes lose as if another writer won.
    pub fn force_conflicts(&self, n: usize) {
        self.forced_conflicts.store(n, Ordering::SeqCst);
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    fn check(&self, key: &str) -> Result<()> {
        if self.fail_keys.lock().unwrap().contains(key) {
            return Err(anyhow!("disk I/O error on {}", key));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>> {
        self.check(key)?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &str, expected: Option<u64>) -> Result<PutOutcome> {
        self.check(key)?;
        {
            let mut fail_value = self.fail_value.lock().unwrap();
            if fail_value.as_deref().is_some_and(|needle| value.contains(needle)) {
                *fail_value = None;
                return Err(anyhow!("disk I/O error on {}", key));
            }
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        if expected.is_some()
            && self
                .forced_conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Ok(PutOutcome::Conflict);
        }
        self.inner.put(key, value, expected).await
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Versioned)>> {
        self.inner.list_by_prefix(prefix).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check(key)?;
        self.inner.delete(key).await
    }
}

// ── Harness ──

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub remote: Arc<FakeRemote>,
    pub sink: Arc<RecordingSink>,
    pub store: Arc<FlakyStore>,
    pub metrics: Arc<RequestMetrics>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(FlakyStore::new());
        let remote = Arc::new(FakeRemote::default());
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = Arc::new(Orchestrator::new(
            RecordStore::new(store.clone()),
            remote.clone(),
            Arc::new(PhaseRenderer),
            sink.clone(),
        ));
        Self {
            orchestrator,
            remote,
            sink,
            store,
            metrics: Arc::new(RequestMetrics::new()),
        }
    }

    pub fn poller(&self) -> Poller {
        Poller::new(
            self.orchestrator.clone(),
            self.metrics.clone(),
            Duration::from_secs(30),
        )
    }

    pub async fn launch(&self, workflow_id: &str, gates: ReviewGates) -> WorkflowRecord {
        self.orchestrator
            .launch(launch_request(workflow_id, gates))
            .await
            .unwrap()
            .record
    }

    pub async fn record(&self, workflow_id: &str) -> WorkflowRecord {
        self.orchestrator.get(workflow_id).await.unwrap()
    }

    /// Launches with plan review and lets the planner finish with `plan`.
    pub async fn park_in_plan_review(&self, workflow_id: &str, plan: &str) -> WorkflowRecord {
        let record = self.launch(workflow_id, gates(false, true)).await;
        let job_id = record.active_job_id.clone().unwrap();
        self.remote
            .set_status(&job_id, RemoteStatus::Finished, Some(plan));
        self.poller().tick().await;
        let record = self.record(workflow_id).await;
        assert_eq!(record.phase, Phase::PlanReview);
        record
    }
}

pub fn gates(context_review: bool, plan_review: bool) -> ReviewGates {
    ReviewGates {
        context_review,
        plan_review,
    }
}

pub fn launch_request(workflow_id: &str, review_gates: ReviewGates) -> LaunchRequest {
    LaunchRequest {
        workflow_id: Some(workflow_id.to_string()),
        channel_id: "C123".to_string(),
        user_id: "U-launcher".to_string(),
        thread_ts: Some("1700000000.000100".to_string()),
        repository: "https://github.com/acme/widgets".to_string(),
        branch: "main".to_string(),
        model_name: "auto".to_string(),
        prompt: "Add a health endpoint".to_string(),
        review_gates,
    }
}

/// A bare record for pure transition tests.
pub fn record_in(phase: Phase) -> WorkflowRecord {
    let now = Utc::now();
    let mut record = WorkflowRecord {
        workflow_id: "wf-pure".to_string(),
        channel_id: "C123".to_string(),
        launching_user_id: "U-launcher".to_string(),
        thread_ts: None,
        repository: "acme/widgets".to_string(),
        branch: "main".to_string(),
        model_name: "auto".to_string(),
        prompt: "Add a health endpoint".to_string(),
        review_gates: gates(true, true),
        phase,
        active_job_id: None,
        job_role: None,
        iteration_count: 1,
        last_known_remote_status: None,
        pending_review_payload: None,
        plan_text: None,
        resolved_reviews: Vec::new(),
        decided_by: None,
        result_summary: None,
        failure_reason: None,
        decision_lock_token: 1,
        created_at: now,
        updated_at: now,
    };
    match phase {
        Phase::LaunchedPlanning | Phase::PlanRunning => {
            record.active_job_id = Some("job-p".to_string());
            record.job_role = Some(JobRole::Planner);
            record.last_known_remote_status = Some(RemoteStatus::Creating);
        }
        Phase::Implementing => {
            record.active_job_id = Some("job-i".to_string());
            record.job_role = Some(JobRole::Implementer);
            record.last_known_remote_status = Some(RemoteStatus::Creating);
        }
        Phase::ContextReview => {
            record.pending_review_payload = Some("context".to_string());
        }
        Phase::PlanReview => {
            record.pending_review_payload = Some("1. do X".to_string());
            record.plan_text = Some("1. do X".to_string());
        }
        _ => {}
    }
    record
}
