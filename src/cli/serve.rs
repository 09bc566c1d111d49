use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::ServeFlags;
use crate::core::lifecycle::LifecycleManager;
use crate::core::metrics::RequestMetrics;
use crate::core::remote::HttpJobClient;
use crate::core::render::{BlockKitRenderer, ChatSink, LogSink, SlackSink};
use crate::core::store::{RecordStore, SqliteStore};
use crate::core::terminal::{print_link, print_status, print_success};
use crate::core::workflow::{Orchestrator, Poller, PollerService};
use crate::interfaces::web::{ApiServer, ApiServerConfig, auth::is_loopback};
use crate::logging::init_tracing;
use crate::platform::{NativePlatform, Platform};

pub async fn run_serve(flags: ServeFlags) -> Result<()> {
    let config = flags.load_config().await?;

    let (log_tx, _) = tokio::sync::broadcast::channel::<String>(500);
    init_tracing(&config.logging.level, log_tx.clone());
    info!("Starting agentgate...");

    let data_dir = NativePlatform::data_dir();
    let store = SqliteStore::open(config.store_path(&data_dir)).await?;
    let records = RecordStore::new(Arc::new(store));
    let resumed = records.count_active_agents().await?;
    if resumed > 0 {
        info!("Resuming {} active agent(s) from the store", resumed);
    }

    if config.remote.api_key.is_empty() {
        warn!("remote.api_key is empty; job launches will be rejected by the remote API");
    }
    let remote = HttpJobClient::new(
        &config.remote.base_url,
        &config.remote.api_key,
        config.remote_timeout(),
    )?;

    let sink: Arc<dyn ChatSink> = if config.slack.bot_token.is_empty() {
        warn!("slack.bot_token is empty; review cards will only be logged");
        Arc::new(LogSink)
    } else {
        Arc::new(SlackSink::new(
            &config.slack.bot_token,
            config.remote_timeout(),
        )?)
    };
    if config.slack.signing_secret.is_empty() {
        warn!("slack.signing_secret is empty; /slack/interactions is unauthenticated");
    }
    if config.server.api_token.is_empty() && !is_loopback(&config.server.host) {
        warn!(
            "server.api_token is empty on non-loopback host {}; /api/* will reject every request",
            config.server.host
        );
    }

    let orchestrator = Arc::new(Orchestrator::new(
        records,
        Arc::new(remote),
        Arc::new(BlockKitRenderer),
        sink,
    ));
    let metrics = Arc::new(RequestMetrics::new());

    let poller = Poller::new(orchestrator.clone(), metrics.clone(), config.poll_interval());
    let poll_interval = poller.interval();
    let api = ApiServer::new(ApiServerConfig {
        orchestrator,
        metrics,
        defaults: config.workflow.clone(),
        log_tx,
        api_host: config.server.host.clone(),
        api_port: config.server.port,
        api_token: config.server.api_token.clone(),
        signing_secret: config.slack.signing_secret.clone(),
    });

    let mut lifecycle = LifecycleManager::new();
    lifecycle.attach(Arc::new(Mutex::new(PollerService::new(poller))));
    lifecycle.attach(Arc::new(Mutex::new(api)));
    lifecycle.start().await?;

    print_success("agentgate is running");
    print_link(
        "API",
        &format!("http://{}:{}/api", config.server.host, config.server.port),
    );
    print_status("Poll interval", &format!("{}s", poll_interval.as_secs()));
    print_status("Press Ctrl+C to stop", "");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    lifecycle.shutdown().await?;
    Ok(())
}
