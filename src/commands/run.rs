use anyhow::{Context, Result};

use tributary::config::Config;
use tributary::manager::ConnectorManager;

/// Run the manager until Ctrl-C
pub async fn run(config: Config) -> Result<()> {
    let manager = ConnectorManager::new(config).context("Failed to build connector manager")?;

    let report = manager
        .initialize()
        .await
        .context("Failed to load connectors from store")?;
    for name in &report.failed {
        tracing::warn!(connector = %name, "Connector left unloaded");
    }

    manager.start();
    println!(
        "tributary running with {} connector(s); press Ctrl-C to stop",
        report.loaded
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    tracing::info!("Interrupt received");
    if manager.shutdown().await {
        tracing::info!("Shutdown complete");
    } else {
        tracing::warn!("Shutdown finished with batches still running");
    }

    Ok(())
}
