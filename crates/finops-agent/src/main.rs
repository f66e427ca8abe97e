//! Waste-opportunity agent
//!
//! Runs detection cycles against the latest cluster snapshot and serves the
//! command surface used by operators, approval bots and CI callbacks.

use anyhow::{Context, Result};
use finops_agent::{api, config};
use finops_lib::{
    external::{
        ApprovalChannel, DirectoryProposalSink, FileBaselineSource, FileSnapshotProvider,
        LogApprovalChannel, WebhookApprovalChannel,
    },
    ledger::{JsonFileStore, Ledger},
    DetectionCycle, FinopsEngine,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting finops-agent");

    let config = config::AgentConfig::load()?;
    info!(
        instance = %config.engine.instance,
        snapshot = %config.snapshot_path.display(),
        interval_secs = config.cycle_interval_secs,
        "Agent configured"
    );

    let ledger = match &config.ledger_path {
        Some(path) => Ledger::open(Arc::new(JsonFileStore::new(path)))
            .with_context(|| format!("Failed to open ledger {}", path.display()))?,
        None => Ledger::in_memory(),
    };
    let ledger = Arc::new(ledger);

    let approvals: Arc<dyn ApprovalChannel> = match &config.approval_webhook_url {
        Some(url) => Arc::new(WebhookApprovalChannel::new(
            url.clone(),
            Duration::from_secs(config.approval_timeout_secs),
        )?),
        None => Arc::new(LogApprovalChannel),
    };
    let sink = Arc::new(DirectoryProposalSink::new(&config.proposal_dir));

    let engine = Arc::new(FinopsEngine::new(config.engine.clone(), ledger.clone(), approvals, sink).await?);
    engine
        .logger()
        .log_startup(AGENT_VERSION, engine.detector_names().len(), ledger.count().await);

    let cycle = Arc::new(DetectionCycle::new(
        engine.clone(),
        Arc::new(FileSnapshotProvider::new(&config.snapshot_path)),
        Arc::new(FileBaselineSource::new(&config.baseline_path)),
        Duration::from_secs(config.cycle_interval_secs),
    ));

    let app_state = Arc::new(api::AppState::new(engine.clone(), Some(cycle.clone())));

    // Mark agent as ready after initialization
    engine.health().set_ready(true).await;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let cycle_handle = tokio::spawn(cycle.run(shutdown_rx));

    // Start command, health and metrics server
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    engine.logger().log_shutdown("SIGINT received");
    engine.health().set_ready(false).await;

    let _ = shutdown_tx.send(());
    if let Err(e) = cycle_handle.await {
        error!(error = %e, "Detection cycle task failed");
    }
    api_handle.abort();
    info!("Shutting down");

    Ok(())
}
