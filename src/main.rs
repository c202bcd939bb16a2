//! Webhook indexer service
//!
//! Serves the job API and delivery endpoint, and runs the job scheduler.

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use webhook_indexer::{api, IndexerConfig, ServiceContainer};

#[derive(Parser)]
#[command(name = "webhook-indexer")]
#[command(about = "Webhook-driven blockchain indexer")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "indexer.toml")]
    config: String,

    /// Override log level
    #[arg(long)]
    log_level: Option<String>,

    /// Dry run mode (validate config and exit)
    #[arg(long)]
    dry_run: bool,

    /// Run with the in-memory store and mock provider
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_found = std::path::Path::new(&cli.config).exists();
    let mut config = if cli.dev {
        IndexerConfig::development()
    } else if config_found {
        IndexerConfig::from_file(&cli.config)?
    } else {
        IndexerConfig::default()
    };

    if let Some(log_level) = cli.log_level {
        config.monitoring.log_level = log_level;
    }

    init_logging(&config)?;

    if !cli.dev && !config_found {
        warn!("Config file not found, using defaults: {}", cli.config);
    }

    info!("Starting webhook indexer");
    info!("Public base URL: {}", config.server.public_base_url);
    info!("Storage backend: {:?}", config.storage.backend);

    config.validate_all()?;
    info!("Configuration validated successfully");

    if cli.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        return Ok(());
    }

    let container = ServiceContainer::new(config).await?;
    container.health_check().await?;

    info!("Starting API server on {}", container.config.server.bind_address);
    let api_server = api::start_server(api::ApiState::new(&container), &container.config.server).await?;

    let _metrics_server = if container.config.monitoring.metrics_port > 0 {
        Some(api::start_metrics_server(container.metrics.clone(), container.config.monitoring.metrics_port).await?)
    } else {
        None
    };

    let scheduler = if container.config.scheduler.enabled {
        Some(container.scheduler.clone().spawn())
    } else {
        info!("In-process scheduler disabled; ticks come from /api/cron/tick");
        None
    };

    info!("Indexer started successfully. Press Ctrl+C to shutdown.");
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = api_server => {
            if let Err(e) = result {
                error!("API server task error: {}", e);
            }
        }
    }

    if let Some(handle) = scheduler {
        handle.abort();
    }

    info!("Shutting down webhook indexer");
    Ok(())
}

fn init_logging(config: &IndexerConfig) -> Result<()> {
    let log_level = config
        .monitoring
        .log_level
        .parse()
        .unwrap_or(tracing::Level::INFO);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("webhook_indexer={},tower_http=info", log_level).into());

    if config.monitoring.structured_logging {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    Ok(())
}
