//! Admission agent - node-local admission control
//!
//! Tracks node resource usage from procfs, runs the admission controllers and
//! serves health, metrics, stats, settings and evaluation endpoints.

use admission_agent::{api, config::AgentConfig};
use admission_lib::{NodeAdmissionControl, ProcfsProbe, StructuredLogger};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting admission-agent");

    let config_path = std::env::var("AGENT_CONFIG_FILE").ok().map(PathBuf::from);
    let config = AgentConfig::load(config_path.as_deref())?;
    info!(
        node_id = %config.node_id,
        mode = %config.admission.transport_mode,
        "Agent configured"
    );

    let mut probe = ProcfsProbe::with_proc_path(&config.proc_path);
    if let Some(devices) = config.devices.clone() {
        probe = probe.with_devices(devices);
    }

    let node = Arc::new(
        NodeAdmissionControl::builder()
            .node_id(&config.node_id)
            .probe(Arc::new(probe))
            .settings(config.admission.clone())
            .classifier(config.classifier())
            .build()?,
    );
    node.start().await?;

    let token = CancellationToken::new();
    let app_state = Arc::new(api::AppState::new(node.clone()));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, token.clone()));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    StructuredLogger::new(&config.node_id).log_shutdown("SIGINT received");

    token.cancel();
    node.stop().await;
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server failed"),
        Err(e) => warn!(error = %e, "API server task panicked"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}
