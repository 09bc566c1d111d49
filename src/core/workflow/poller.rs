use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::machine::WorkflowEvent;
use super::orchestrator::{Dispatched, Orchestrator};
use crate::core::lifecycle::LifecycleComponent;
use crate::core::metrics::{POLL_FAILURES, POLL_TICKS, RequestMetrics};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub polled: usize,
    pub changed: usize,
    pub failed: usize,
}

/// Reconciles remote job status into workflow records.
#[derive(Clone)]
pub struct Poller {
    orchestrator: Arc<Orchestrator>,
    metrics: Arc<RequestMetrics>,
    interval: Duration,
}

impl Poller {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        metrics: Arc<RequestMetrics>,
        interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            metrics,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One reconciliation pass. A failure on one workflow never stops the
    /// others from being polled.
    pub async fn tick(&self) -> TickReport {
        self.metrics.incr(POLL_TICKS);
        let mut report = TickReport::default();

        let open = match self.orchestrator.records().list_open().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Poller could not list workflows: {}", e);
                self.metrics.incr(POLL_FAILURES);
                report.failed += 1;
                return report;
            }
        };

        for workflow_id in open {
            let record = match self.orchestrator.records().get_open_workflow(&workflow_id).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    warn!(workflow_id = %workflow_id, "Poller could not read workflow: {}", e);
                    self.metrics.incr(POLL_FAILURES);
                    report.failed += 1;
                    continue;
                }
            };
            let Some(job_id) = record.active_job_id.clone() else {
                if record.awaits_launch().is_some() {
                    report.polled += 1;
                    self.resume_launch(&workflow_id, &mut report).await;
                }
                continue;
            };
            report.polled += 1;

            let job = match self.orchestrator.remote().get(&job_id).await {
                Ok(job) => job,
                Err(e) => {
                    warn!(
                        workflow_id = %record.workflow_id,
                        job_id = %job_id,
                        "Remote status check failed: {}",
                        e
                    );
                    self.metrics.incr(POLL_FAILURES);
                    report.failed += 1;
                    continue;
                }
            };

            if record.last_known_remote_status == Some(job.status) {
                continue;
            }

            let event = WorkflowEvent::RemoteStatusChanged {
                job_id: job_id.clone(),
                status: job.status,
                summary: job.summary,
            };
            match self.orchestrator.dispatch(&record.workflow_id, event).await {
                Ok(Dispatched::Applied(_)) => report.changed += 1,
                Ok(Dispatched::Stale { reason, .. }) => {
                    debug!(workflow_id = %record.workflow_id, "Skipped status change: {}", reason);
                }
                Err(e) => {
                    warn!(
                        workflow_id = %record.workflow_id,
                        job_id = %job_id,
                        "Failed to apply remote status: {}",
                        e
                    );
                    self.metrics.incr(POLL_FAILURES);
                    report.failed += 1;
                }
            }
        }

        report
    }

    async fn resume_launch(&self, workflow_id: &str, report: &mut TickReport) {
        match self.orchestrator.resume_launch(workflow_id).await {
            Ok(Some(_)) => report.changed += 1,
            Ok(None) => {}
            Err(e) => {
                warn!(workflow_id, "Failed to resume launch: {}", e);
                self.metrics.incr(POLL_FAILURES);
                report.failed += 1;
            }
        }
    }

    /// Ticks until cancelled. Ticks never overlap: a slow tick delays the
    /// next one instead of stacking up.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Poller running every {}s", self.interval.as_secs());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let started = Instant::now();
            let report = self.tick().await;
            let elapsed = started.elapsed();
            if elapsed > self.interval {
                warn!(
                    "Poll tick took {:.1}s, longer than the {}s interval",
                    elapsed.as_secs_f64(),
                    self.interval.as_secs()
                );
            }
            if report.polled > 0 {
                debug!(
                    polled = report.polled,
                    changed = report.changed,
                    failed = report.failed,
                    "Poll tick complete"
                );
            }
        }
        info!("Poller stopped");
    }
}

pub struct PollerService {
    poller: Poller,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PollerService {
    pub fn new(poller: Poller) -> Self {
        Self {
            poller,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }
}

#[async_trait]
impl LifecycleComponent for PollerService {
    async fn on_init(&mut self) -> Result<()> {
        info!("Workflow poller initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let poller = self.poller.clone();
        let cancel = self.cancel.clone();
        self.handle = Some(tokio::spawn(poller.run(cancel)));
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("Workflow poller shutting down...");
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.await?;
        }
        Ok(())
    }
}
