//! # Dependency Wiring
//!
//! Turns a validated [`RuntimeConfig`] into concrete adapters and hands them
//! to the pipeline. The blob store backend is chosen here, once.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use da_batcher::adapters::{
    HttpEncoderClient, HttpStorageNodeClient, InMemoryBlobStore, JsonRpcChainClient,
    StaticOperatorRegistry,
};
use da_batcher::{Batcher, BatcherDeps, BatcherMetrics, BlobStore, StoreBackend, StoreConfig};

use crate::config::RuntimeConfig;

/// Open the configured blob store.
pub fn build_store(config: &StoreConfig) -> Result<Arc<dyn BlobStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-memory blob store (contents are lost on exit)");
            Ok(Arc::new(InMemoryBlobStore::new()))
        }
        #[cfg(feature = "rocksdb")]
        StoreBackend::Rocksdb => {
            let store = da_batcher::adapters::RocksDbBlobStore::open(&config.path)
                .with_context(|| format!("failed to open blob store at {}", config.path.display()))?;
            info!(path = %config.path.display(), "Opened RocksDB blob store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "rocksdb"))]
        StoreBackend::Rocksdb => anyhow::bail!(
            "store backend `rocksdb` requires building with the `rocksdb` feature"
        ),
    }
}

/// Build the pipeline over `store`. Fails on any configuration problem
/// before a single outbound call is made.
pub fn build_batcher(
    config: &RuntimeConfig,
    store: Arc<dyn BlobStore>,
    metrics: BatcherMetrics,
) -> Result<Batcher> {
    let encoder = HttpEncoderClient::new(&config.batcher.encoder_socket)
        .context("failed to create encoder client")?;
    let registry = StaticOperatorRegistry::from_config(&config.nodes)
        .context("failed to load operator registry")?;
    if registry.is_empty() {
        tracing::warn!("No storage node operators configured; every dispatch will fall short");
    }
    let chain = JsonRpcChainClient::new(&config.chain).context("failed to create chain client")?;
    let signer = config
        .chain
        .signer()
        .context("failed to load batcher key")?;

    info!(
        encoder = %encoder.endpoint(),
        operators = registry.len(),
        chain_id = config.chain.chain_id,
        sender = %address_label(&chain.sender()),
        "Pipeline dependencies ready"
    );

    let deps = BatcherDeps {
        store,
        encoder: Arc::new(encoder),
        registry: Arc::new(registry),
        nodes: Arc::new(HttpStorageNodeClient::new()),
        chain: Arc::new(chain),
        signer: Arc::new(signer),
        metrics,
    };
    Batcher::new(config.batcher.clone(), deps).context("failed to create batcher")
}

fn address_label(address: &[u8; 20]) -> String {
    format!("0x{}", hex::encode(address))
}
