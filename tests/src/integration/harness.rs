//! Shared wiring for the pipeline scenarios.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use da_batcher::adapters::InMemoryBlobStore;
use da_batcher::test_utils::{
    default_params, operator_set, registry_for, MockChain, ScriptedEncoder, ScriptedStorageNodes,
};
use da_batcher::{
    Batcher, BatcherConfig, BatcherDeps, BatcherMetrics, Blob, BlobKey, BlobStatus, BlobStore,
    BlobSubmission, OperatorState, QuorumId, Result, SecurityParam, StatusUpdate, StoreError,
};
use shared_crypto::Secp256k1KeyPair;

/// A status change the store accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub key: BlobKey,
    pub from: BlobStatus,
    pub to: BlobStatus,
}

/// In-memory store that logs every accepted status change.
#[derive(Default)]
pub struct RecordingStore {
    inner: InMemoryBlobStore,
    transitions: Mutex<Vec<Transition>>,
}

impl RecordingStore {
    pub fn transitions(&self) -> Vec<Transition> {
        self.transitions.lock().clone()
    }

    pub fn transitions_of(&self, key: &BlobKey) -> Vec<(BlobStatus, BlobStatus)> {
        self.transitions
            .lock()
            .iter()
            .filter(|t| &t.key == key)
            .map(|t| (t.from, t.to))
            .collect()
    }
}

#[async_trait]
impl BlobStore for RecordingStore {
    async fn enqueue(&self, submission: BlobSubmission) -> std::result::Result<BlobKey, StoreError> {
        self.inner.enqueue(submission).await
    }

    async fn get_by_status(
        &self,
        status: BlobStatus,
        limit: usize,
    ) -> std::result::Result<Vec<Blob>, StoreError> {
        self.inner.get_by_status(status, limit).await
    }

    async fn update_status(
        &self,
        key: &BlobKey,
        expected: BlobStatus,
        update: StatusUpdate,
    ) -> std::result::Result<bool, StoreError> {
        let to = update.to;
        let applied = self.inner.update_status(key, expected, update).await?;
        if applied {
            self.transitions.lock().push(Transition {
                key: *key,
                from: expected,
                to,
            });
        }
        Ok(applied)
    }

    async fn increment_retry(&self, key: &BlobKey) -> std::result::Result<u32, StoreError> {
        self.inner.increment_retry(key).await
    }

    async fn get(&self, key: &BlobKey) -> std::result::Result<Blob, StoreError> {
        self.inner.get(key).await
    }
}

/// Batcher settings tuned for paused-clock tests.
pub fn config() -> BatcherConfig {
    BatcherConfig {
        encoder_socket: "http://encoder:34000".into(),
        pull_interval_ms: 100,
        max_num_retries_per_blob: 2,
        retry_backoff_base_ms: 10,
        retry_backoff_max_ms: 100,
        confirmation_poll_interval_ms: 50,
        finalization_interval: 10,
        finalizer_interval_secs: 1,
        ..BatcherConfig::default()
    }
}

/// Everything outside the batcher process: store, encoder, storage nodes
/// and chain. Survives a batcher restart.
pub struct Harness {
    pub store: Arc<RecordingStore>,
    pub encoder: Arc<ScriptedEncoder>,
    pub nodes: Arc<ScriptedStorageNodes>,
    pub chain: Arc<MockChain>,
    pub state: OperatorState,
}

impl Harness {
    /// Four operators in quorum 0, chain head at 100.
    pub fn new() -> Self {
        Self::with_operators(&[(0, 4)])
    }

    pub fn with_operators(groups: &[(QuorumId, usize)]) -> Self {
        let (state, keys) = operator_set(100, groups);
        Self {
            store: Arc::new(RecordingStore::default()),
            encoder: Arc::new(ScriptedEncoder::new()),
            nodes: Arc::new(ScriptedStorageNodes::new(keys)),
            chain: Arc::new(MockChain::new(100)),
            state,
        }
    }

    /// A fresh batcher process over this harness.
    pub fn batcher(&self, config: BatcherConfig) -> Result<Batcher> {
        self.batcher_with_metrics(config, BatcherMetrics::new())
    }

    pub fn batcher_with_metrics(
        &self,
        config: BatcherConfig,
        metrics: BatcherMetrics,
    ) -> Result<Batcher> {
        Batcher::new(
            config,
            BatcherDeps {
                store: self.store.clone(),
                encoder: self.encoder.clone(),
                registry: Arc::new(registry_for(&self.state)),
                nodes: self.nodes.clone(),
                chain: self.chain.clone(),
                signer: Arc::new(Secp256k1KeyPair::generate()),
                metrics,
            },
        )
    }

    pub async fn submit(&self, payload: &[u8]) -> BlobKey {
        self.submit_with(payload, default_params()).await
    }

    pub async fn submit_with(&self, payload: &[u8], params: Vec<SecurityParam>) -> BlobKey {
        self.store
            .enqueue(BlobSubmission::new(payload.to_vec(), params))
            .await
            .unwrap()
    }

    pub async fn blob(&self, key: &BlobKey) -> Blob {
        self.store.get(key).await.unwrap()
    }

    pub async fn status(&self, key: &BlobKey) -> BlobStatus {
        self.blob(key).await.status()
    }
}
