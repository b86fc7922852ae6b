//! icebox: an operational audit/error store for message-driven systems.

use clap::Parser;
use snafu::prelude::*;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use icebox_core::error::AddressParseSnafu;
use icebox_core::{init_metrics, init_tracing, shutdown_signal};

use icebox::backend::MemoryBackend;
use icebox::config::Config;
use icebox::engine::Engine;
use icebox::error::{EngineConfigSnafu, EngineError, EngineMetricsSnafu};
use icebox::recovery::LoggingDispatcher;

/// Operational audit/error store for message-driven systems.
#[derive(Parser, Debug)]
#[command(name = "icebox")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dry run - validate configuration without starting the engine.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), EngineError> {
    let args = Args::parse();

    init_tracing();
    info!("icebox starting");

    let config = match &args.config {
        Some(path) => Config::from_path(path).context(EngineConfigSnafu)?,
        None => Config::default(),
    };

    if config.metrics.enabled {
        let addr: SocketAddr = config
            .metrics
            .address
            .parse()
            .context(AddressParseSnafu)
            .context(EngineMetricsSnafu)?;
        init_metrics(addr).context(EngineMetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
    }

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        info!("  Batch size: {}", config.ingestion.batch_size);
        info!("  Writers: {}", config.ingestion.writers);
        info!("  Audit retention: {} days", config.retention.audit_days);
        info!("  Error retention: {} days", config.retention.error_days);
        info!("Configuration is valid");
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let backend = Arc::new(MemoryBackend::new(config.capacity.max_stored_records));
    let engine = Engine::new(&config, backend, Arc::new(LoggingDispatcher), shutdown);
    engine.run().await;

    info!("icebox stopped");
    Ok(())
}
