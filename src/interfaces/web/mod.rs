pub(crate) mod auth;
mod handlers;
mod router;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::config::WorkflowDefaults;
use crate::core::lifecycle::LifecycleComponent;
use crate::core::metrics::RequestMetrics;
use crate::core::workflow::Orchestrator;

pub struct ApiServerConfig {
    pub orchestrator: Arc<Orchestrator>,
    pub metrics: Arc<RequestMetrics>,
    pub defaults: WorkflowDefaults,
    pub log_tx: tokio::sync::broadcast::Sender<String>,
    pub api_host: String,
    pub api_port: u16,
    pub api_token: String,
    pub signing_secret: String,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) orchestrator: Arc<Orchestrator>,
    pub(crate) metrics: Arc<RequestMetrics>,
    pub(crate) defaults: Arc<WorkflowDefaults>,
    pub(crate) log_tx: tokio::sync::broadcast::Sender<String>,
    pub(crate) api_host: String,
    pub(crate) api_port: u16,
    pub(crate) api_token: String,
    pub(crate) signing_secret: String,
}

impl From<ApiServerConfig> for AppState {
    fn from(config: ApiServerConfig) -> Self {
        Self {
            orchestrator: config.orchestrator,
            metrics: config.metrics,
            defaults: Arc::new(config.defaults),
            log_tx: config.log_tx,
            api_host: config.api_host,
            api_port: config.api_port,
            api_token: config.api_token,
            signing_secret: config.signing_secret,
        }
    }
}

pub struct ApiServer {
    state: AppState,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            state: config.into(),
            cancel: CancellationToken::new(),
            handle: None,
        }
    }
}

// --- SSE Logs (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(log) => Ok(Event::default().data(log)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream)
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API Server Interface initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.state.api_host, self.state.api_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding API server to {}", addr))?;
        let app = router::build_api_router(self.state.clone());
        let cancel = self.cancel.clone();

        info!("API Server running at http://{addr}");
        self.handle = Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await
            {
                tracing::error!("API Server crashed: {}", e);
            }
        }));
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server Interface shutting down...");
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.await?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_state_with(
    harness: &crate::core::workflow::tests::support::Harness,
    api_host: &str,
    api_token: &str,
) -> AppState {
    let (log_tx, _) = tokio::sync::broadcast::channel(16);
    AppState {
        orchestrator: harness.orchestrator.clone(),
        metrics: harness.metrics.clone(),
        defaults: Arc::new(WorkflowDefaults::default()),
        log_tx,
        api_host: api_host.to_string(),
        api_port: 17900,
        api_token: api_token.to_string(),
        signing_secret: String::new(),
    }
}

#[cfg(test)]
pub(crate) fn test_state(api_host: &str, api_token: &str) -> AppState {
    let harness = crate::core::workflow::tests::support::Harness::new();
    test_state_with(&harness, api_host, api_token)
}
