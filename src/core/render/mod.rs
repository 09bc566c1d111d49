mod slack;

pub use slack::{ACCEPT_ACTION_ID, BlockKitRenderer, REJECT_ACTION_ID, SlackSink};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::core::workflow::types::{Phase, WorkflowRecord};

/// Everything a card may show besides the phase and the review payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardContext {
    pub workflow_id: String,
    pub repository: String,
    pub branch: String,
    pub iteration: u32,
    pub job_id: Option<String>,
    pub remote_status: Option<String>,
    pub decided_by: Option<String>,
    pub result_summary: Option<String>,
    pub failure_reason: Option<String>,
}

impl CardContext {
    pub fn from_record(record: &WorkflowRecord) -> Self {
        Self {
            workflow_id: record.workflow_id.clone(),
            repository: record.repository.clone(),
            branch: record.branch.clone(),
            iteration: record.iteration_count,
            job_id: record.active_job_id.clone(),
            remote_status: record
                .last_known_remote_status
                .map(|s| s.as_str().to_string()),
            decided_by: record.decided_by.clone(),
            result_summary: record.result_summary.clone(),
            failure_reason: record.failure_reason.clone(),
        }
    }
}

/// Turns workflow state into an opaque chat message.
pub trait CardRenderer: Send + Sync {
    fn render(&self, phase: Phase, payload: Option<&str>, context: &CardContext) -> Value;
}

#[async_trait]
pub trait ChatSink: Send + Sync {
    async fn publish(&self, channel_id: &str, thread_ts: Option<&str>, message: &Value)
    -> Result<()>;
}

/// Sink used when no chat token is configured: cards only reach the log.
pub struct LogSink;

#[async_trait]
impl ChatSink for LogSink {
    async fn publish(
        &self,
        channel_id: &str,
        thread_ts: Option<&str>,
        message: &Value,
    ) -> Result<()> {
        let text = message
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or_default();
        info!(
            channel_id,
            thread_ts = thread_ts.unwrap_or("-"),
            "Card: {}",
            text
        );
        Ok(())
    }
}
