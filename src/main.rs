use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use tributary::config::Config;

#[derive(Parser)]
#[command(
    name = "tributary",
    version,
    about = "Connector manager that schedules repository traversals and feeds a search index",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); environment variables are used otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the config file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the manager until Ctrl-C
    Run,

    /// Create a connector instance
    Add {
        /// Instance name
        name: String,

        /// Connector type
        #[arg(short = 't', long = "type")]
        type_name: String,

        /// Configuration property (KEY=VALUE), repeatable
        #[arg(short, long = "set", value_name = "KEY=VALUE")]
        properties: Vec<String>,

        /// Locale for validation messages
        #[arg(long, default_value = tributary::manager::DEFAULT_LOCALE)]
        locale: String,
    },

    /// Replace a connector instance's configuration
    Update {
        /// Instance name
        name: String,

        /// New connector type; the current one is kept if omitted
        #[arg(short = 't', long = "type")]
        type_name: Option<String>,

        /// Configuration property (KEY=VALUE), repeatable
        #[arg(short, long = "set", value_name = "KEY=VALUE")]
        properties: Vec<String>,

        /// Locale for validation messages
        #[arg(long, default_value = tributary::manager::DEFAULT_LOCALE)]
        locale: String,
    },

    /// Delete a connector instance and its persisted state
    Remove {
        /// Instance name
        name: String,
    },

    /// Replace a schedule, e.g. `docs:200:300000:1-2:22-4`
    Schedule {
        /// Instance name
        name: String,

        /// Schedule string
        schedule: String,
    },

    /// Forget the checkpoint and traverse from the beginning
    Restart {
        /// Instance name
        name: String,
    },

    /// Show instance status
    Status {
        /// Instance name; all instances if omitted
        name: Option<String>,

        /// Also print Prometheus metrics
        #[arg(long, default_value = "false")]
        metrics: bool,
    },

    /// List configured instance names
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate()?;

    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());

    // Initialize tracing/logging
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    if let Err(e) = tributary::metrics::init_metrics() {
        tracing::warn!("Metrics initialization failed: {}", e);
    }

    match cli.command {
        Commands::Run => {
            tracing::info!("Starting run command");
            commands::run(config).await?;
        }

        Commands::Add {
            name,
            type_name,
            properties,
            locale,
        } => {
            tracing::info!(connector = %name, type_name = %type_name, "Starting add command");
            commands::add(config, name, type_name, properties, locale).await?;
        }

        Commands::Update {
            name,
            type_name,
            properties,
            locale,
        } => {
            tracing::info!(connector = %name, type_name = ?type_name, "Starting update command");
            commands::update(config, name, type_name, properties, locale).await?;
        }

        Commands::Remove { name } => {
            tracing::info!(connector = %name, "Starting remove command");
            commands::remove(config, name).await?;
        }

        Commands::Schedule { name, schedule } => {
            tracing::info!(connector = %name, schedule = %schedule, "Starting schedule command");
            commands::schedule(config, name, schedule).await?;
        }

        Commands::Restart { name } => {
            tracing::info!(connector = %name, "Starting restart command");
            commands::restart(config, name).await?;
        }

        Commands::Status { name, metrics } => {
            commands::status(config, name, metrics).await?;
        }

        Commands::List => {
            commands::list(config).await?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("tributary=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(format!("tributary={level},warn"))
        })
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
