use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;

use super::{CardContext, CardRenderer, ChatSink};
use crate::core::workflow::types::Phase;

pub const ACCEPT_ACTION_ID: &str = "agentgate_accept";
pub const REJECT_ACTION_ID: &str = "agentgate_reject";

// Slack rejects section text longer than 3000 characters.
const MAX_SECTION_CHARS: usize = 2900;

fn headline(phase: Phase) -> &'static str {
    match phase {
        Phase::LaunchedPlanning => ":hourglass_flowing_sand: Planning started",
        Phase::ContextReview => ":mag: Review the request context",
        Phase::ContextAccepted => ":white_check_mark: Context accepted, starting planner",
        Phase::ContextRejected => ":no_entry: Context rejected",
        Phase::PlanRunning => ":hourglass_flowing_sand: Planner running",
        Phase::PlanReview => ":memo: Review the proposed plan",
        Phase::PlanAccepted => ":white_check_mark: Plan accepted, starting implementation",
        Phase::PlanRejected => ":no_entry: Plan rejected",
        Phase::Implementing => ":hammer_and_wrench: Implementing",
        Phase::Finished => ":tada: Finished",
        Phase::Failed => ":x: Failed",
        Phase::Stopped => ":octagonal_sign: Stopped",
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_SECTION_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX_SECTION_CHARS).collect();
    format!("{}\n_(truncated)_", cut)
}

fn section(text: String) -> Value {
    json!({ "type": "section", "text": { "type": "mrkdwn", "text": text } })
}

/// Slack Block Kit cards with accept/reject buttons on review phases.
#[derive(Default)]
pub struct BlockKitRenderer;

impl CardRenderer for BlockKitRenderer {
    fn render(&self, phase: Phase, payload: Option<&str>, context: &CardContext) -> Value {
        let title = headline(phase);
        let mut blocks = vec![section(format!("*{}*", title))];

        let mut facts = vec![
            format!("`{}`", context.workflow_id),
            format!("{}@{}", context.repository, context.branch),
            format!("iteration {}", context.iteration),
        ];
        if let Some(status) = &context.remote_status {
            facts.push(format!("remote {}", status));
        }
        if let Some(user) = &context.decided_by {
            facts.push(format!("by <@{}>", user));
        }
        blocks.push(json!({
            "type": "context",
            "elements": [{ "type": "mrkdwn", "text": facts.join(" | ") }]
        }));

        if let Some(payload) = payload.filter(|p| !p.trim().is_empty()) {
            blocks.push(section(truncate(payload)));
        }
        if let Some(summary) = &context.result_summary {
            blocks.push(section(truncate(summary)));
        }
        if let Some(reason) = &context.failure_reason {
            blocks.push(section(format!("*Reason:* {}", truncate(reason))));
        }

        if phase.review_gate().is_some() {
            let value = json!({
                "workflow_id": context.workflow_id,
                "phase": phase.as_str(),
            })
            .to_string();
            blocks.push(json!({
                "type": "actions",
                "elements": [
                    {
                        "type": "button",
                        "action_id": ACCEPT_ACTION_ID,
                        "style": "primary",
                        "text": { "type": "plain_text", "text": "Accept" },
                        "value": value,
                    },
                    {
                        "type": "button",
                        "action_id": REJECT_ACTION_ID,
                        "style": "danger",
                        "text": { "type": "plain_text", "text": "Reject" },
                        "value": value,
                    }
                ]
            }));
        }

        json!({
            "text": format!("{} ({})", title, context.workflow_id),
            "blocks": blocks,
        })
    }
}

/// Posts cards through `chat.postMessage`.
pub struct SlackSink {
    bot_token: String,
    api_base: String,
    client: Client,
}

impl SlackSink {
    pub fn new(bot_token: &str, timeout: Duration) -> Result<Self> {
        Self::with_api_base(bot_token, "https://slack.com/api", timeout)
    }

    pub fn with_api_base(bot_token: &str, api_base: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            bot_token: bot_token.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            client: Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl ChatSink for SlackSink {
    async fn publish(
        &self,
        channel_id: &str,
        thread_ts: Option<&str>,
        message: &Value,
    ) -> Result<()> {
        let mut body = message.clone();
        body["channel"] = json!(channel_id);
        if let Some(ts) = thread_ts {
            body["thread_ts"] = json!(ts);
        }

        let res = self
            .client
            .post(format!("{}/chat.postMessage", self.api_base))
            .header("Authorization", format!("Bearer {}", self.bot_token))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(anyhow!("Slack API Error: {}", res.status()));
        }
        // Slack reports most failures as 200 with ok=false.
        let reply: Value = res.json().await?;
        if reply.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            return Err(anyhow!(
                "Slack rejected message: {}",
                reply
                    .get("error")
                    .and_then(|e| e.as_str())
                    .unwrap_or("unknown error")
            ));
        }
        Ok(())
    }
}
