//! # DA Batcher - Batch Lifecycle Pipeline
//!
//! Moves submitted blobs through encoding, dispatch to storage nodes,
//! on-chain confirmation and finalization.
//!
//! ## Lifecycle
//!
//! ```text
//! Queued ──encode──→ Encoded ──dispatch──→ Dispatched ──confirm──→ Confirmed ──depth──→ Finalized
//!    └──────────────────┴──────────────────────┴──────────────────────┴──→ Failed
//! ```
//!
//! Every move is a compare-and-swap on the blob store, which is the only
//! shared state between the batch loop and the finalizer loop.
//!
//! ## Architecture Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │  Adapters (Outer)                                   │
//! │  - In-memory / RocksDB blob store                   │
//! │  - HTTP encoder, HTTP storage nodes                 │
//! │  - JSON-RPC chain client, static operator registry  │
//! └─────────────────────────────────────────────────────┘
//!                         │
//! ┌─────────────────────────────────────────────────────┐
//! │  Ports (Middle)                                     │
//! │  - BlobStore, EncoderClient, StorageNodeClient      │
//! │  - ChainClient, OperatorRegistry                    │
//! └─────────────────────────────────────────────────────┘
//!                         │
//! ┌─────────────────────────────────────────────────────┐
//! │  Domain (Inner - Pure Logic)                        │
//! │  - Batch/blob headers, chunk assignment             │
//! │  - Stake thresholds, retry policy                   │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`domain`]: pure pipeline logic
//! - [`ports`]: interfaces to the outside world
//! - [`adapters`]: implementations of the ports
//! - [`service`]: the batcher, its stages and the finalizer

#![warn(clippy::all)]

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{
    BatcherConfig, ChainConfig, OperatorConfig, QuorumStake, StorageNodeConfig, StoreBackend,
    StoreConfig, TimeoutConfig,
};
pub use error::{BatcherError, ConfigError, Result, Stage};
pub use metrics::BatcherMetrics;

pub use domain::{
    BatchHeader, BlobHeader, ConfirmationRecord, ConfirmationStatus, CycleReport,
    DispatchResult, DispatchedBlob, EncodedBlob, EncodingParams, FinalizationRecord,
    FinalizationReport, Operator, OperatorState, RetryPolicy,
};
pub use ports::{
    BlobStore, ChainClient, ConfirmBatchCall, EncoderClient, OperatorRegistry,
    SentTx, StorageNodeClient, TxHash, TxReceipt,
};
pub use service::{Batcher, BatcherDeps, Confirmer, Dispatcher, Finalizer};
pub use shared_types::{
    Blob, BlobKey, BlobMetadata, BlobStatus, BlobSubmission, ConfirmationInfo, DispatchInfo,
    FailureReason, OperatorId, QuorumId, SecurityParam, StatusUpdate, StoreError,
};
