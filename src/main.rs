//! Pulse Agent Binary Entry Point
//!
//! Collects runtime and host metrics and ships them to a collector service.
//! Core functionality is provided by the `pulse` library crate.

use std::path::Path;
use std::time::Duration;

use clap::Parser;
use pulse::{
    agent::AgentBuilder,
    alloc::TrackingAllocator,
    config::{AgentConfig, parse_duration},
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static ALLOCATOR: TrackingAllocator = TrackingAllocator::new();

/// Pulse - runtime and host telemetry agent
#[derive(Parser, Debug)]
#[command(name = "pulse-agent", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/agent.yaml",
        env = "PULSE_CONFIG"
    )]
    config: String,

    /// Collector address (overrides config file)
    #[arg(short, long, env = "PULSE_ADDRESS")]
    address: Option<String>,

    /// Collector poll interval, e.g. `2s` (overrides config file)
    #[arg(short, long, env = "PULSE_POLL_INTERVAL", value_parser = parse_duration)]
    poll_interval: Option<Duration>,

    /// Report interval, e.g. `10s` (overrides config file)
    #[arg(short, long, env = "PULSE_REPORT_INTERVAL", value_parser = parse_duration)]
    report_interval: Option<Duration>,

    /// Number of delivery workers (overrides config file)
    #[arg(short = 'l', long, env = "PULSE_RATE_LIMIT")]
    rate_limit: Option<usize>,

    /// HMAC signing key (overrides config file)
    #[arg(short, long, env = "PULSE_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Path to the collector's RSA public key (overrides config file)
    #[arg(long, env = "PULSE_CRYPTO_KEY")]
    crypto_key: Option<String>,

    /// Log level for this crate (overrides config file)
    #[arg(long, env = "PULSE_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration; a missing file means defaults.
    let file_exists = Path::new(&cli.config).exists();
    let mut config = if file_exists {
        AgentConfig::load(&cli.config)?
    } else {
        AgentConfig::default()
    };

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(address) = cli.address {
        config.address = address;
    }
    if let Some(interval) = cli.poll_interval {
        config.poll_interval = interval;
    }
    if let Some(interval) = cli.report_interval {
        config.report_interval = interval;
    }
    if let Some(rate_limit) = cli.rate_limit {
        config.rate_limit = rate_limit;
    }
    if let Some(key) = cli.key {
        config.key = Some(key);
    }
    if let Some(path) = cli.crypto_key {
        config.crypto_key = Some(path.into());
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    config.validate()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("info,pulse={}", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Pulse - runtime and host telemetry agent");
    if file_exists {
        tracing::info!(path = %cli.config, "Configuration loaded");
    } else {
        tracing::info!(path = %cli.config, "Configuration file not found, using defaults");
    }
    tracing::info!(
        address = %config.address,
        signed = config.signing_key().is_some(),
        encrypted = config.crypto_key.is_some(),
        "Reporting to collector"
    );

    let cancel = CancellationToken::new();
    let agent = AgentBuilder::new(config)
        .with_allocator(&ALLOCATOR)
        .start(cancel.clone())?;

    for job in agent.jobs() {
        tracing::info!(id = job.id, name = %job.name, interval = ?job.interval, "Collector running");
    }
    tracing::info!("Press Ctrl+C to shutdown");

    shutdown_signal().await;
    cancel.cancel();

    agent.shutdown().await?;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
