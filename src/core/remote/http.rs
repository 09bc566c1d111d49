use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{LaunchParams, RemoteJob, RemoteJobClient};
use crate::core::workflow::types::RemoteStatus;

#[derive(Serialize)]
struct CreateRequest<'a> {
    prompt: PromptBody<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    source: SourceBody<'a>,
}

#[derive(Serialize)]
struct PromptBody<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct SourceBody<'a> {
    repository: &'a str,
    #[serde(rename = "ref")]
    git_ref: &'a str,
}

#[derive(Deserialize)]
struct JobResponse {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

/// Background-agent REST client. Every call is bounded by the client timeout.
pub struct HttpJobClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl HttpJobClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(res: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        if res.status().is_success() {
            return Ok(res);
        }
        let status = res.status();
        Err(anyhow!(
            "Remote {} failed ({}): {}",
            what,
            status,
            res.text().await.unwrap_or_default()
        ))
    }
}

#[async_trait]
impl RemoteJobClient for HttpJobClient {
    async fn create(&self, params: &LaunchParams) -> Result<String> {
        let model = params.model_name.trim();
        let body = CreateRequest {
            prompt: PromptBody {
                text: &params.prompt,
            },
            model: (!model.is_empty() && model != "auto").then_some(model),
            source: SourceBody {
                repository: &params.repository,
                git_ref: &params.branch,
            },
        };
        let res = self
            .client
            .post(self.url("/v0/agents"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let parsed: JobResponse = Self::check(res, "create").await?.json().await?;
        if parsed.id.is_empty() {
            return Err(anyhow!("Remote create returned an empty job id"));
        }
        debug!(job_id = %parsed.id, "Remote job created");
        Ok(parsed.id)
    }

    async fn get(&self, job_id: &str) -> Result<RemoteJob> {
        let res = self
            .client
            .get(self.url(&format!("/v0/agents/{}", job_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let parsed: JobResponse = Self::check(res, "status").await?.json().await?;
        let raw = parsed.status.unwrap_or_default();
        let status = RemoteStatus::parse(&raw)
            .ok_or_else(|| anyhow!("Unknown remote status '{}' for job {}", raw, job_id))?;
        Ok(RemoteJob {
            job_id: parsed.id,
            status,
            summary: parsed.summary,
        })
    }

    async fn stop(&self, job_id: &str) -> Result<()> {
        let res = self
            .client
            .post(self.url(&format!("/v0/agents/{}/stop", job_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Self::check(res, "stop").await?;
        Ok(())
    }
}
