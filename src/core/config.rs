use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::core::workflow::ReviewGates;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const MIN_POLL_INTERVAL_SECS: u64 = 10;

pub const ENV_REMOTE_API_KEY: &str = "AGENTGATE_REMOTE_API_KEY";
pub const ENV_SLACK_BOT_TOKEN: &str = "AGENTGATE_SLACK_BOT_TOKEN";
pub const ENV_SLACK_SIGNING_SECRET: &str = "AGENTGATE_SLACK_SIGNING_SECRET";
pub const ENV_API_TOKEN: &str = "AGENTGATE_API_TOKEN";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub workflow: WorkflowDefaults,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// When set, `/api/*` requires `Authorization: Bearer <api_token>`.
    #[serde(default)]
    pub api_token: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PollerConfig {
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_remote_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SlackConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub signing_secret: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowDefaults {
    #[serde(default)]
    pub context_review: bool,
    #[serde(default = "default_true")]
    pub plan_review: bool,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    17900
}
fn default_remote_base_url() -> String {
    "https://api.cursor.com".to_string()
}
fn default_remote_timeout() -> u64 {
    15
}
fn default_true() -> bool {
    true
}
fn default_model() -> String {
    "auto".to_string()
}
fn default_branch() -> String {
    "main".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_token: String::new(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_remote_base_url(),
            api_key: String::new(),
            timeout_secs: default_remote_timeout(),
        }
    }
}

impl Default for WorkflowDefaults {
    fn default() -> Self {
        Self {
            context_review: false,
            plan_review: true,
            default_model: default_model(),
            default_branch: default_branch(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl WorkflowDefaults {
    pub fn review_gates(&self) -> ReviewGates {
        ReviewGates {
            context_review: self.context_review,
            plan_review: self.plan_review,
        }
    }
}

impl AppConfig {
    /// Reads `path`, falling back to defaults when the file does not exist,
    /// then applies environment overrides.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            info!("Loaded config from {}", path.display());
            config
        } else {
            info!("No config at {}, using defaults.", path.display());
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Non-empty values returned by `lookup` replace the file secrets.
    pub fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        let overrides: [(&str, &mut String); 4] = [
            (ENV_REMOTE_API_KEY, &mut self.remote.api_key),
            (ENV_SLACK_BOT_TOKEN, &mut self.slack.bot_token),
            (ENV_SLACK_SIGNING_SECRET, &mut self.slack.signing_secret),
            (ENV_API_TOKEN, &mut self.server.api_token),
        ];
        for (key, slot) in overrides {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = value;
            }
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(effective_poll_interval(self.poller.interval_secs))
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.timeout_secs.max(1))
    }

    pub fn store_path(&self, data_dir: &Path) -> PathBuf {
        if self.store.path.trim().is_empty() {
            data_dir.join("agentgate.db")
        } else {
            PathBuf::from(self.store.path.trim())
        }
    }

    /// Copy safe to print: secrets are masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for secret in [
            &mut copy.server.api_token,
            &mut copy.remote.api_key,
            &mut copy.slack.bot_token,
            &mut copy.slack.signing_secret,
        ] {
            if !secret.is_empty() {
                *secret = "********".to_string();
            }
        }
        copy
    }
}

/// Intervals below the minimum fall back to the default.
pub fn effective_poll_interval(configured: Option<u64>) -> u64 {
    match configured {
        Some(secs) if secs >= MIN_POLL_INTERVAL_SECS => secs,
        _ => DEFAULT_POLL_INTERVAL_SECS,
    }
}

pub fn default_config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("agentgate.toml")
}
