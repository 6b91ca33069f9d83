//! Adapters for the outbound ports

pub mod chain_rpc;
pub mod encoder_http;
pub mod memory_store;
pub mod node_http;
pub mod registry;
#[cfg(feature = "rocksdb")]
pub mod rocksdb_store;
pub mod tx;

pub use chain_rpc::JsonRpcChainClient;
pub use encoder_http::HttpEncoderClient;
pub use memory_store::InMemoryBlobStore;
pub use node_http::HttpStorageNodeClient;
pub use registry::StaticOperatorRegistry;
#[cfg(feature = "rocksdb")]
pub use rocksdb_store::RocksDbBlobStore;

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch; zero if the clock is before it.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
