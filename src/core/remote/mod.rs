mod http;

pub use http::HttpJobClient;

use anyhow::Result;
use async_trait::async_trait;

use crate::core::workflow::types::RemoteStatus;

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchParams {
    pub repository: String,
    pub branch: String,
    pub model_name: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteJob {
    pub job_id: String,
    pub status: RemoteStatus,
    /// Final output of the job, usually only present once it has finished.
    pub summary: Option<String>,
}

/// The third-party service that actually runs agent jobs.
#[async_trait]
pub trait RemoteJobClient: Send + Sync {
    async fn create(&self, params: &LaunchParams) -> Result<String>;
    async fn get(&self, job_id: &str) -> Result<RemoteJob>;
    async fn stop(&self, job_id: &str) -> Result<()>;
}
