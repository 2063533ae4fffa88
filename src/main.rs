//! Blockchain Miner - Main Application
//!
//! Mines the configured number of blocks and prints the audit of the resulting chain.

use blockchain_miner::{
    config::{Config, LogFormat},
    Coordinator, RandomTransactions, Result, TracingReporter, APP_DESCRIPTION, APP_NAME,
    APP_VERSION,
};

use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured log level.
fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    match config.log_format {
        LogFormat::Plain => tracing_subscriber::registry()
            .with(fmt::layer().with_target(false))
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(false))
            .with(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load and validate configuration
    let config = Config::load().await?;
    init_tracing(&config);

    // Handle special commands
    if config.info {
        print_info();
        return Ok(());
    }

    if config.print_config {
        print_configuration(&config)?;
        return Ok(());
    }

    let order = config.work_order()?;
    let deadline = config.timeout_duration()?;

    info!("Starting {} v{}", APP_NAME, APP_VERSION);
    info!(
        "Configuration: blocks={}, workers={}, workload={}, difficulty={}, hasher={}, timeout={}",
        order.blocks_to_mine(),
        order.worker_count(),
        order.workload_per_worker(),
        order.difficulty(),
        config.hasher,
        config.timeout
    );

    let coordinator = Coordinator::new(
        config.hasher.hasher(),
        Arc::new(RandomTransactions),
        Arc::new(TracingReporter),
    )
    .with_options(config.coordinator_options())
    .spawn();

    let result = tokio::select! {
        result = coordinator.start(order, deadline) => result,
        _ = signal::ctrl_c() => {
            warn!("Interrupted, shutting down");
            Err(coordinator.cancel())
        }
    };
    coordinator.join().await;

    let report = result?;
    report.chain.validate()?;

    if config.print_chain {
        println!("{}", serde_json::to_string_pretty(&report.chain)?);
    }

    Ok(())
}

/// Print basic program information
fn print_info() {
    println!("{} v{}", APP_NAME, APP_VERSION);
    println!("{}", APP_DESCRIPTION);
}

/// Print current configuration
fn print_configuration(config: &Config) -> Result<()> {
    println!("{}", config.to_yaml()?);
    Ok(())
}
