use anyhow::{Context, Result};

use tributary::config::Config;
use tributary::coordinator::ConfigureResponse;
use tributary::manager::ConnectorManager;
use tributary::scheduler::Schedule;
use tributary::utils::parse_properties;

/// Build a non-ticking manager over the configured store
async fn open(config: Config) -> Result<ConnectorManager> {
    let manager = ConnectorManager::new(config).context("Failed to build connector manager")?;
    manager
        .initialize()
        .await
        .context("Failed to load connectors from store")?;
    Ok(manager)
}

async fn close(manager: ConnectorManager) {
    manager.shutdown().await;
}

fn report(name: &str, response: &ConfigureResponse) -> Result<()> {
    match response {
        ConfigureResponse::Applied => {
            println!("Connector '{name}' configured");
            Ok(())
        }
        ConfigureResponse::Rejected { message, suggested } => {
            println!("Configuration for '{name}' rejected: {message}");
            if let Some(suggested) = suggested {
                println!("Suggested properties:");
                for (key, value) in suggested {
                    println!("  {key}={value}");
                }
            }
            anyhow::bail!("configuration rejected")
        }
    }
}

pub async fn add(
    config: Config,
    name: String,
    type_name: String,
    properties: Vec<String>,
    locale: String,
) -> Result<()> {
    let properties = parse_properties(&properties)?;
    let manager = open(config).await?;

    let result = manager
        .set_connector_config(&name, Some(&type_name), properties, &locale, false)
        .await;
    close(manager).await;

    report(&name, &result?)
}

pub async fn update(
    config: Config,
    name: String,
    type_name: Option<String>,
    properties: Vec<String>,
    locale: String,
) -> Result<()> {
    let properties = parse_properties(&properties)?;
    let manager = open(config).await?;

    let result = manager
        .set_connector_config(&name, type_name.as_deref(), properties, &locale, true)
        .await;
    close(manager).await;

    report(&name, &result?)
}

pub async fn remove(config: Config, name: String) -> Result<()> {
    let manager = open(config).await?;
    let result = manager.remove_connector(&name).await;
    close(manager).await;

    result?;
    println!("Connector '{name}' removed");
    Ok(())
}

pub async fn schedule(config: Config, name: String, schedule: String) -> Result<()> {
    let schedule = Schedule::parse(&schedule)
        .with_context(|| format!("Invalid schedule '{schedule}'"))?;

    let manager = open(config).await?;
    let result = manager.set_schedule(&name, schedule.clone()).await;
    close(manager).await;

    result?;
    println!("Schedule for '{name}' set to {schedule}");
    Ok(())
}

pub async fn restart(config: Config, name: String) -> Result<()> {
    let manager = open(config).await?;
    let result = manager.restart_connector_traversal(&name).await;
    close(manager).await;

    result?;
    println!("Traversal of '{name}' restarted");
    Ok(())
}

pub async fn status(config: Config, name: Option<String>, show_metrics: bool) -> Result<()> {
    let manager = open(config).await?;

    let result = match &name {
        Some(name) => manager.connector_status(name).await.map(|s| vec![s]),
        None => Ok(manager.connector_statuses().await),
    };
    let stats = manager.stats().await;
    close(manager).await;

    let statuses = result?;
    if statuses.is_empty() {
        println!("No connectors configured");
    } else {
        for status in &statuses {
            println!("{status}");
        }
        println!();
        println!(
            "{} configured, {} running",
            stats.configured, stats.running
        );
    }

    if show_metrics {
        let text = tributary::metrics::encode_metrics()
            .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {e}"))?;
        println!();
        print!("{text}");
    }

    Ok(())
}

pub async fn list(config: Config) -> Result<()> {
    let manager = open(config).await?;
    let names = manager.connector_names().await;
    close(manager).await;

    for name in names {
        println!("{name}");
    }
    Ok(())
}
