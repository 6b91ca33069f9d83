//! # DA Batcher Runtime
//!
//! Process shell around the [`da_batcher`] pipeline.
//!
//! ## Concurrent Loops
//!
//! ```text
//!                      shutdown (watch<bool>)
//!          ┌──────────────────┼───────────────────┐
//!          ↓                  ↓                   ↓
//!    Batch loop          Finalizer loop     Metrics endpoint
//!  (every pull interval) (every finalizer   (/metrics, optional)
//!          │              interval)
//!          └──────── BlobStore (CAS) ─────────┘
//! ```
//!
//! ## Startup Sequence
//!
//! 1. Resolve configuration (flags > env > file > defaults)
//! 2. Validate it; a missing encoder socket exits here
//! 3. Initialize logging
//! 4. Open the blob store and wire adapters
//! 5. Start the metrics endpoint (if enabled) and the batch loop
//! 6. On SIGINT, signal shutdown and drain in-flight confirmations
//!
//! ## Modular Structure
//!
//! - `config` - CLI, environment and TOML resolution
//! - `wiring` - store selection and dependency injection

pub mod config;
pub mod wiring;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};

use da_batcher::{Batcher, BatcherMetrics};

pub use config::{Args, MetricsConfig, RuntimeConfig};

/// The running batcher process.
pub struct BatcherRuntime {
    batcher: Arc<Batcher>,
    metrics: MetricsConfig,
    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,
    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
}

impl BatcherRuntime {
    /// Validate `config` and wire every component. Nothing is started yet.
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        config.validate()?;

        let store = wiring::build_store(&config.store)?;
        let batcher = wiring::build_batcher(config, store, BatcherMetrics::new())?;
        Ok(Self::with_batcher(batcher, config.metrics.clone()))
    }

    /// Wrap an already wired pipeline.
    pub fn with_batcher(batcher: Batcher, metrics: MetricsConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            batcher: Arc::new(batcher),
            metrics,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn batcher(&self) -> Arc<Batcher> {
        Arc::clone(&self.batcher)
    }

    /// Run every loop until `signal` resolves or the batch loop exits,
    /// then shut down gracefully.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let metrics_server = if self.metrics.enabled {
            let registry = self.batcher.metrics().registry().clone();
            let port = self.metrics.http_port;
            let shutdown = self.shutdown_rx.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = da_telemetry::serve_metrics(registry, port, shutdown).await {
                    error!(error = %e, "Metrics endpoint stopped");
                }
            }))
        } else {
            info!("Metrics endpoint disabled");
            None
        };

        let run = self.batcher.run(self.shutdown_rx.clone());
        tokio::pin!(run);

        let result = tokio::select! {
            result = &mut run => result,
            _ = signal => {
                info!("Shutdown signal received");
                let _ = self.shutdown_tx.send(true);
                (&mut run).await
            }
        };

        // the batch loop may have exited on its own; stop the endpoint too
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = metrics_server {
            if let Err(e) = handle.await {
                error!(error = %e, "Metrics task failed");
            }
        }

        result.context("batch loop failed")?;
        info!("Batcher stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use da_batcher::adapters::InMemoryBlobStore;
    use da_batcher::test_utils::{
        operator_set, registry_for, MockChain, ScriptedEncoder, ScriptedStorageNodes,
    };
    use da_batcher::{BatcherConfig, BatcherDeps};
    use shared_crypto::Secp256k1KeyPair;
    use std::time::Duration;

    fn scripted_batcher() -> Batcher {
        let (state, keys) = operator_set(0, &[(0, 2)]);
        let config = BatcherConfig {
            encoder_socket: "http://encoder".into(),
            pull_interval_ms: 50,
            ..BatcherConfig::default()
        };
        let deps = BatcherDeps {
            store: Arc::new(InMemoryBlobStore::new()),
            encoder: Arc::new(ScriptedEncoder::new()),
            registry: Arc::new(registry_for(&state)),
            nodes: Arc::new(ScriptedStorageNodes::new(keys)),
            chain: Arc::new(MockChain::new(10)),
            signer: Arc::new(Secp256k1KeyPair::generate()),
            metrics: BatcherMetrics::new(),
        };
        Batcher::new(config, deps).unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected_before_wiring() {
        let err = BatcherRuntime::new(&RuntimeConfig::default()).err().unwrap();
        assert!(err.to_string().contains("invalid batcher configuration"));
    }

    #[tokio::test]
    async fn test_runtime_stops_on_signal() {
        let runtime = BatcherRuntime::with_batcher(scripted_batcher(), MetricsConfig::default());
        let signal = tokio::time::sleep(Duration::from_millis(120));
        tokio::time::timeout(Duration::from_secs(5), runtime.run_until(signal))
            .await
            .expect("runtime did not stop")
            .unwrap();
    }
}
