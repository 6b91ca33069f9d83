//! # DA Batcher
//!
//! Entry point of the `batcher` binary. See the library docs for the
//! startup sequence and the loops it runs.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use batcher_runtime::{Args, BatcherRuntime, RuntimeConfig};
use da_telemetry::TelemetryConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Configuration is checked before logging so a bad setup fails fast
    let config = RuntimeConfig::resolve(&args)?;
    config.validate()?;

    let mut telemetry = TelemetryConfig::from_env();
    telemetry.metrics_port = config.metrics.http_port;
    da_telemetry::init_logging(&telemetry).context("failed to initialize logging")?;

    info!("===========================================");
    info!("  DA Batcher v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================");
    info!(
        encoder = %config.batcher.encoder_socket,
        chain_rpc = %config.chain.rpc_url,
        store = ?config.store.backend,
        pull_interval_ms = config.batcher.pull_interval_ms,
        max_retries = config.batcher.max_num_retries_per_blob,
        metrics = config.metrics.enabled,
        "Configuration loaded"
    );

    let runtime = BatcherRuntime::new(&config)?;

    info!("Batcher is running. Press Ctrl+C to stop.");
    runtime
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await
}
