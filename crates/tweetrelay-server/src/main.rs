//! Tweet relay server

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tweetrelay_connectors::kafka::{
    HttpRegistryProbe, KafkaAdminClient, KafkaPublisher, RdKafkaAdmin,
};
use tweetrelay_connectors::{AppConfig, Orchestrator, OrchestratorState};

/// Tweet relay - keyword-filtered status messages into Kafka
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "tweetrelay.toml")]
    config: String,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_config(path: &str) -> Result<AppConfig> {
    let config = if Path::new(path).exists() {
        AppConfig::load(path).with_context(|| format!("loading {path}"))?
    } else {
        warn!(path, "config file not found, using defaults");
        AppConfig::default()
    };
    let config = config.with_env_overrides();
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "tweetrelay_server={level},tweetrelay_connectors={level}",
                    level = args.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tweet relay");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Config file: {}", args.config);

    let config = load_config(&args.config)?;

    let cancel = CancellationToken::new();
    let broker = Arc::new(RdKafkaAdmin::new(&config.kafka)?);
    let registry = Arc::new(HttpRegistryProbe::new(
        config.kafka.schema_registry_url.clone(),
        config.kafka.admin_timeout(),
    )?);
    let admin = KafkaAdminClient::new(broker, registry, config.retry.clone(), cancel.clone());
    let publisher = Arc::new(KafkaPublisher::new(
        &config.kafka.bootstrap_servers,
        &config.producer,
    )?);

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_cancel.cancel();
        }
    });

    let mut orchestrator = Orchestrator::new(config, admin, publisher, cancel);
    match orchestrator.run().await? {
        OrchestratorState::Streaming => {
            // The source cannot be stopped; keep relaying until killed.
            info!("source keeps running; press Ctrl-C again or kill the process to exit");
            tokio::signal::ctrl_c().await?;
        }
        state => info!(%state, "relay stopped"),
    }

    Ok(())
}
