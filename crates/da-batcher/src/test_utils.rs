//! Scripted doubles for every outbound port.
//!
//! Enabled for unit tests and, through the `test-utils` feature, for the
//! integration test crate.

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_crypto::{keccak256, keccak256_concat, Secp256k1KeyPair};
use shared_types::{
    BlobAttestation, BlobKey, BlobStatus, BlobSubmission, DispatchInfo, OperatorId, QuorumId,
    QuorumResult, SecurityParam, StatusUpdate,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::adapters::StaticOperatorRegistry;
use crate::domain::{
    BlobHeader, DispatchedBlob, EncodedBlob, EncodedChunk, EncodingParams, Operator,
    OperatorState,
};
use crate::error::{BatcherError, Result};
use crate::ports::{
    BlobStore, ChainClient, ConfirmBatchCall, EncoderClient, SentTx, StorageNodeClient,
    StoreChunksReply, StoreChunksRequest, TxHash, TxReceipt,
};

/// Stake every generated operator holds in each of its quorums.
pub const TEST_STAKE: u64 = 100;

/// Operator set with `count` fresh operators per `(quorum, count)` group.
///
/// Ids are `[1; 32]`, `[2; 32]`, ... in group order. Returns the signing
/// key of every operator for [`ScriptedStorageNodes`].
pub fn operator_set(
    block_number: u64,
    groups: &[(QuorumId, usize)],
) -> (OperatorState, HashMap<OperatorId, Secp256k1KeyPair>) {
    let mut operators = Vec::new();
    let mut keys = HashMap::new();
    let mut next = 1u8;
    for (quorum, count) in groups {
        for _ in 0..*count {
            let id = OperatorId([next; 32]);
            let key = Secp256k1KeyPair::generate();
            operators.push(Operator {
                id,
                socket: format!("mock://operator-{next}"),
                public_key: key.public_key(),
                stakes: BTreeMap::from([(*quorum, TEST_STAKE)]),
            });
            keys.insert(id, key);
            next = next.wrapping_add(1);
        }
    }
    (OperatorState::new(block_number, operators), keys)
}

/// Registry serving the operators of `state` at every block.
pub fn registry_for(state: &OperatorState) -> StaticOperatorRegistry {
    StaticOperatorRegistry::new(state.operators.values().cloned().collect())
}

/// Security parameters most tests use: quorum 0, 33% adversary, 67% quorum.
pub fn default_params() -> Vec<SecurityParam> {
    vec![SecurityParam::new(0, 33, 67)]
}

/// Enqueue `payload` and walk it straight to `Dispatched`.
pub async fn seed_dispatched(
    store: &dyn BlobStore,
    payload: &[u8],
    reference_block_number: u64,
) -> DispatchedBlob {
    let key: BlobKey = store
        .enqueue(BlobSubmission::new(payload.to_vec(), default_params()))
        .await
        .expect("enqueue");
    let blob_header_hash = keccak256_concat(&[b"header", payload]);
    let attestations = vec![BlobAttestation {
        operator: OperatorId([1; 32]),
        signature: vec![0; 65],
    }];
    let info = DispatchInfo {
        reference_block_number,
        blob_header_hash,
        commitment: keccak256(payload),
        attestations: attestations.clone(),
        quorum_results: vec![QuorumResult {
            quorum_id: 0,
            signed_stake_percent: 100,
        }],
    };
    assert!(store
        .update_status(&key, BlobStatus::Queued, StatusUpdate::to(BlobStatus::Encoded))
        .await
        .expect("encode"));
    assert!(store
        .update_status(&key, BlobStatus::Encoded, StatusUpdate::dispatched(info))
        .await
        .expect("dispatch"));
    DispatchedBlob {
        key,
        blob_header_hash,
        attestations,
    }
}

// =============================================================================
// ENCODER
// =============================================================================

enum EncoderScript {
    Fail { remaining: Option<u32> },
    Hang,
}

/// Deterministic encoder: the commitment is the payload hash, so re-encoding
/// reproduces it.
#[derive(Default)]
pub struct ScriptedEncoder {
    scripts: Mutex<HashMap<Vec<u8>, EncoderScript>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call for this payload fails.
    pub fn fail_payload(&self, payload: &[u8]) {
        self.scripts
            .lock()
            .insert(payload.to_vec(), EncoderScript::Fail { remaining: None });
    }

    /// The next `times` calls for this payload fail.
    pub fn fail_payload_times(&self, payload: &[u8], times: u32) {
        self.scripts.lock().insert(
            payload.to_vec(),
            EncoderScript::Fail {
                remaining: Some(times),
            },
        );
    }

    /// Calls for this payload never return.
    pub fn hang_payload(&self, payload: &[u8]) {
        self.scripts
            .lock()
            .insert(payload.to_vec(), EncoderScript::Hang);
    }

    pub fn heal(&self) {
        self.scripts.lock().clear();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Encoding the scripted encoder would produce for `data`.
    pub fn expected(data: &[u8], params: &[EncodingParams]) -> EncodedBlob {
        let chunks = params
            .iter()
            .flat_map(|p| {
                (0..p.num_chunks).map(move |index| EncodedChunk {
                    quorum_id: p.quorum_id,
                    index,
                    data: keccak256_concat(&[data, &[p.quorum_id], &index.to_be_bytes()]).to_vec(),
                })
            })
            .collect();
        EncodedBlob {
            commitment: keccak256(data),
            data_length: data.len() as u64,
            chunks,
        }
    }

    /// `None` to proceed, `Some(true)` to hang, `Some(false)` to fail.
    fn scripted(&self, data: &[u8]) -> Option<bool> {
        let mut scripts = self.scripts.lock();
        let outcome = match scripts.get_mut(data)? {
            EncoderScript::Hang => return Some(true),
            EncoderScript::Fail { remaining: None } => return Some(false),
            EncoderScript::Fail {
                remaining: Some(remaining),
            } => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
        };
        if outcome {
            scripts.remove(data);
        }
        Some(false)
    }
}

#[async_trait]
impl EncoderClient for ScriptedEncoder {
    async fn encode(
        &self,
        data: &[u8],
        params: &[EncodingParams],
        _timeout: Duration,
    ) -> Result<EncodedBlob> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;

        let result = match self.scripted(data) {
            Some(true) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                std::future::pending::<()>().await;
                unreachable!("pending never resolves")
            }
            Some(false) => Err(BatcherError::Encoder("scripted failure".into())),
            None => Ok(Self::expected(data, params)),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// =============================================================================
// STORAGE NODES
// =============================================================================

/// Storage nodes that sign with their registered keys unless scripted otherwise.
pub struct ScriptedStorageNodes {
    keys: HashMap<OperatorId, Secp256k1KeyPair>,
    hanging: Mutex<HashSet<OperatorId>>,
    failing: Mutex<HashSet<OperatorId>>,
    forging: Mutex<HashSet<OperatorId>>,
    requests: AtomicUsize,
    received: Mutex<Vec<(OperatorId, StoreChunksRequest)>>,
}

impl ScriptedStorageNodes {
    pub fn new(keys: HashMap<OperatorId, Secp256k1KeyPair>) -> Self {
        Self {
            keys,
            hanging: Mutex::default(),
            failing: Mutex::default(),
            forging: Mutex::default(),
            requests: AtomicUsize::new(0),
            received: Mutex::default(),
        }
    }

    /// Operator never answers.
    pub fn hang(&self, id: OperatorId) {
        self.hanging.lock().insert(id);
    }

    /// Operator answers with an error.
    pub fn fail(&self, id: OperatorId) {
        self.failing.lock().insert(id);
    }

    /// Operator signs with a key it is not registered with.
    pub fn forge(&self, id: OperatorId) {
        self.forging.lock().insert(id);
    }

    pub fn heal(&self) {
        self.hanging.lock().clear();
        self.failing.lock().clear();
        self.forging.lock().clear();
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<(OperatorId, StoreChunksRequest)> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl StorageNodeClient for ScriptedStorageNodes {
    async fn store_chunks(
        &self,
        operator: &Operator,
        request: StoreChunksRequest,
    ) -> Result<StoreChunksReply> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let hanging = self.hanging.lock().contains(&operator.id);
        if hanging {
            std::future::pending::<()>().await;
        }
        let failing = self.failing.lock().contains(&operator.id);
        if failing {
            return Err(BatcherError::Dispatch(format!(
                "{}: connection refused",
                operator.id.short()
            )));
        }

        let forged = self.forging.lock().contains(&operator.id);
        let impostor;
        let key = if forged {
            impostor = Secp256k1KeyPair::generate();
            &impostor
        } else {
            self.keys.get(&operator.id).ok_or_else(|| {
                BatcherError::Dispatch(format!("{}: unknown operator", operator.id.short()))
            })?
        };

        let signatures = request
            .blobs
            .iter()
            .map(|blob| {
                let digest = BlobHeader::attestation_digest(&blob.blob_header.hash());
                key.sign_digest(&digest)
                    .map(|sig| sig.to_bytes().to_vec())
                    .map_err(|e| BatcherError::Signing(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        self.received.lock().push((operator.id, request));
        Ok(StoreChunksReply { signatures })
    }
}

// =============================================================================
// CHAIN
// =============================================================================

const MOCK_GAS_PRICE: u128 = 1_000_000_000;

enum SubmitScript {
    Unreachable,
    Reject(String),
    Revert,
}

#[derive(Default)]
struct ChainState {
    receipts: HashMap<TxHash, TxReceipt>,
    /// Call carried by each nonce's current transaction, indexed by nonce
    submissions: Vec<ConfirmBatchCall>,
    /// Current transaction hash per nonce
    by_nonce: Vec<TxHash>,
    broadcasts: usize,
    submit_scripts: Vec<SubmitScript>,
    withhold_receipts: bool,
    head_unavailable: bool,
}

/// In-memory chain. Confirmations are mined at the current head as soon as
/// they are submitted unless receipts are withheld. While withheld they
/// count as pending and can be replaced at the same nonce.
#[derive(Default)]
pub struct MockChain {
    head: AtomicU64,
    state: Mutex<ChainState>,
    nonce: AtomicU64,
}

impl MockChain {
    pub fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            ..Self::default()
        }
    }

    pub fn head(&self) -> u64 {
        self.head.load(Ordering::SeqCst)
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn advance(&self, blocks: u64) {
        self.head.fetch_add(blocks, Ordering::SeqCst);
    }

    /// Next `times` submissions fail as if the node were unreachable.
    pub fn fail_submissions(&self, times: usize) {
        let mut state = self.state.lock();
        for _ in 0..times {
            state.submit_scripts.push(SubmitScript::Unreachable);
        }
    }

    /// Next submission is rejected by the node with `reason`.
    pub fn reject_next(&self, reason: &str) {
        self.state
            .lock()
            .submit_scripts
            .push(SubmitScript::Reject(reason.to_string()));
    }

    /// Next submission is mined but reverts.
    pub fn revert_next(&self) {
        self.state.lock().submit_scripts.push(SubmitScript::Revert);
    }

    pub fn withhold_receipts(&self, withhold: bool) {
        self.state.lock().withhold_receipts = withhold;
    }

    pub fn set_head_unavailable(&self, unavailable: bool) {
        self.state.lock().head_unavailable = unavailable;
    }

    /// Move a mined transaction to another block, as after a reorg.
    pub fn move_receipt(&self, tx_hash: &TxHash, block_number: u64) {
        if let Some(receipt) = self.state.lock().receipts.get_mut(tx_hash) {
            receipt.block_number = block_number;
        }
    }

    /// Forget a mined transaction, as after a reorg that dropped it.
    pub fn drop_receipt(&self, tx_hash: &TxHash) {
        self.state.lock().receipts.remove(tx_hash);
    }

    pub fn submissions(&self) -> Vec<ConfirmBatchCall> {
        self.state.lock().submissions.clone()
    }

    /// Transactions that can end up on chain: one per nonce used.
    pub fn submission_count(&self) -> usize {
        self.state.lock().submissions.len()
    }

    /// Every broadcast, replacements included.
    pub fn broadcast_count(&self) -> usize {
        self.state.lock().broadcasts
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64> {
        if self.state.lock().head_unavailable {
            return Err(BatcherError::Chain("connection refused".into()));
        }
        Ok(self.head())
    }

    async fn submit_confirmation(
        &self,
        call: &ConfirmBatchCall,
        replacing: Option<&SentTx>,
    ) -> Result<SentTx> {
        let mut state = self.state.lock();
        let script = if state.submit_scripts.is_empty() {
            None
        } else {
            Some(state.submit_scripts.remove(0))
        };
        let success = match script {
            Some(SubmitScript::Unreachable) => {
                return Err(BatcherError::Chain("connection refused".into()))
            }
            Some(SubmitScript::Reject(reason)) => {
                return Err(BatcherError::TransactionRejected(reason))
            }
            Some(SubmitScript::Revert) => false,
            None => true,
        };

        let (nonce, gas_price) = match replacing {
            Some(previous) => {
                let index = previous.nonce as usize;
                let Some(current) = state.by_nonce.get(index).copied() else {
                    return Err(BatcherError::TransactionRejected("unknown nonce".into()));
                };
                if !state.withhold_receipts && state.receipts.contains_key(&current) {
                    return Err(BatcherError::TransactionRejected("nonce too low".into()));
                }
                state.receipts.remove(&current);
                (previous.nonce, previous.gas_price + previous.gas_price / 10 + 1)
            }
            None => (self.nonce.fetch_add(1, Ordering::SeqCst), MOCK_GAS_PRICE),
        };
        let tx_hash = keccak256_concat(&[
            &call.header.hash(),
            &nonce.to_be_bytes(),
            &gas_price.to_be_bytes(),
        ]);

        let index = nonce as usize;
        if index < state.submissions.len() {
            state.submissions[index] = call.clone();
            state.by_nonce[index] = tx_hash;
        } else {
            state.submissions.push(call.clone());
            state.by_nonce.push(tx_hash);
        }
        state.broadcasts += 1;
        state.receipts.insert(
            tx_hash,
            TxReceipt {
                tx_hash,
                block_number: self.head(),
                success,
            },
        );
        Ok(SentTx {
            tx_hash,
            nonce,
            gas_price,
        })
    }

    async fn transaction_receipt(&self, tx_hash: &TxHash) -> Result<Option<TxReceipt>> {
        let state = self.state.lock();
        if state.withhold_receipts {
            return Ok(None);
        }
        Ok(state.receipts.get(tx_hash).cloned())
    }
}
