//! Chunk fan-out to storage nodes and attestation collection.

use futures::future::join_all;
use shared_crypto::{keccak256_concat, Secp256k1KeyPair};
use shared_types::{BlobAttestation, BlobKey, Hash, OperatorId, QuorumResult, SecurityParam};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::with_timeout;
use crate::domain::{
    assign_chunks, meets_threshold, stake_percent, BatchHeader, BlobDispatchOutcome, BlobHeader,
    DispatchResult, EncodedBlob, Operator, OperatorState,
};
use crate::error::{BatcherError, Result, Stage};
use crate::metrics::BatcherMetrics;
use crate::ports::{BlobChunks, StorageNodeClient, StoreChunksReply, StoreChunksRequest};

/// An encoded blob ready to be sent out.
#[derive(Clone, Debug)]
pub struct EncodedBlobRef {
    pub key: BlobKey,
    pub header: BlobHeader,
    pub encoded: EncodedBlob,
}

impl EncodedBlobRef {
    pub fn new(key: BlobKey, encoded: EncodedBlob, security_params: &[SecurityParam]) -> Self {
        Self {
            key,
            header: BlobHeader::new(&encoded, security_params),
            encoded,
        }
    }
}

/// Sends chunks to every assigned operator in parallel and tallies the
/// attested stake per quorum.
pub struct Dispatcher {
    nodes: Arc<dyn StorageNodeClient>,
    signer: Arc<Secp256k1KeyPair>,
    attestation_timeout: Duration,
    metrics: BatcherMetrics,
}

/// Digest the batcher signs when addressing an operator.
pub fn request_digest(batch_header_hash: &Hash, operator: &OperatorId) -> Hash {
    keccak256_concat(&[batch_header_hash, &operator.0])
}

impl Dispatcher {
    pub fn new(
        nodes: Arc<dyn StorageNodeClient>,
        signer: Arc<Secp256k1KeyPair>,
        attestation_timeout: Duration,
        metrics: BatcherMetrics,
    ) -> Self {
        Self {
            nodes,
            signer,
            attestation_timeout,
            metrics,
        }
    }

    /// Dispatch one batch against the operator set at its reference block.
    ///
    /// Never fails as a whole: unreachable or misbehaving operators only
    /// reduce the attested stake of the blobs they were assigned.
    pub async fn dispatch(
        &self,
        batch: &BatchHeader,
        blobs: &[EncodedBlobRef],
        state: &OperatorState,
    ) -> DispatchResult {
        let _timer = self.metrics.stage_timer(Stage::Dispatch);
        let batch_hash = batch.hash();
        let header_hashes: Vec<Hash> = blobs.iter().map(|b| b.header.hash()).collect();

        // Per operator: (blob position, chunks) in batch order
        let mut per_operator: BTreeMap<OperatorId, Vec<(usize, BlobChunks)>> = BTreeMap::new();
        for (position, blob) in blobs.iter().enumerate() {
            let assignment = assign_chunks(state, &blob.encoded, &blob.header.security_params);
            for (operator, chunks) in assignment {
                per_operator.entry(operator).or_default().push((
                    position,
                    BlobChunks {
                        blob_header: blob.header.clone(),
                        chunks,
                    },
                ));
            }
        }

        let mut failed = BTreeSet::new();
        let mut calls = Vec::with_capacity(per_operator.len());
        for (id, assigned) in per_operator {
            let Some(operator) = state.get(&id) else {
                failed.insert(id);
                continue;
            };
            let (positions, blob_chunks): (Vec<usize>, Vec<BlobChunks>) =
                assigned.into_iter().unzip();
            match self.build_request(batch, &batch_hash, &id, blob_chunks) {
                Ok(request) => calls.push(self.call(operator, request, positions)),
                Err(e) => {
                    warn!(operator = %id.short(), error = %e, "[dispatcher] Could not sign request");
                    failed.insert(id);
                }
            }
        }

        let replies = join_all(calls).await;

        let mut acknowledged = BTreeSet::new();
        let mut attestations: Vec<BTreeMap<OperatorId, BlobAttestation>> =
            blobs.iter().map(|_| BTreeMap::new()).collect();
        for (operator, positions, reply) in replies {
            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(
                        operator = %operator.id.short(),
                        timeout = e.is_timeout(),
                        error = %e,
                        "[dispatcher] Operator did not acknowledge"
                    );
                    failed.insert(operator.id);
                    continue;
                }
            };
            if reply.signatures.len() != positions.len() {
                warn!(
                    operator = %operator.id.short(),
                    expected = positions.len(),
                    got = reply.signatures.len(),
                    "[dispatcher] Reply signature count mismatch"
                );
                failed.insert(operator.id);
                continue;
            }

            let mut all_valid = true;
            for (position, signature) in positions.into_iter().zip(reply.signatures) {
                let digest = BlobHeader::attestation_digest(&header_hashes[position]);
                if operator.public_key.verify_digest(&digest, &signature).is_ok() {
                    attestations[position].insert(
                        operator.id,
                        BlobAttestation {
                            operator: operator.id,
                            signature,
                        },
                    );
                } else {
                    all_valid = false;
                }
            }
            if all_valid {
                acknowledged.insert(operator.id);
            } else {
                warn!(operator = %operator.id.short(), "[dispatcher] Invalid attestation signature");
                failed.insert(operator.id);
            }
        }

        let per_blob: Vec<BlobDispatchOutcome> = blobs
            .iter()
            .zip(header_hashes)
            .zip(attestations)
            .map(|((blob, blob_header_hash), signed)| {
                self.tally(blob, blob_header_hash, signed, state)
            })
            .collect();

        info!(
            batch = %hex::encode(&batch_hash[..6]),
            reference_block = batch.reference_block_number,
            blobs = blobs.len(),
            acknowledged = acknowledged.len(),
            failed = failed.len(),
            sufficient = per_blob.iter().filter(|b| b.sufficient).count(),
            "[dispatcher] Batch dispatched"
        );

        DispatchResult {
            acknowledged,
            failed,
            per_blob,
        }
    }

    fn build_request(
        &self,
        batch: &BatchHeader,
        batch_hash: &Hash,
        operator: &OperatorId,
        blobs: Vec<BlobChunks>,
    ) -> Result<StoreChunksRequest> {
        let signature = self
            .signer
            .sign_digest(&request_digest(batch_hash, operator))
            .map_err(|e| BatcherError::Signing(e.to_string()))?;
        Ok(StoreChunksRequest {
            batch_header: batch.clone(),
            blobs,
            signature: signature.to_bytes().to_vec(),
        })
    }

    async fn call<'a>(
        &self,
        operator: &'a Operator,
        request: StoreChunksRequest,
        positions: Vec<usize>,
    ) -> (&'a Operator, Vec<usize>, Result<StoreChunksReply>) {
        debug!(
            operator = %operator.id.short(),
            blobs = positions.len(),
            "[dispatcher] Sending chunks"
        );
        let reply = with_timeout(
            Stage::Dispatch,
            self.attestation_timeout,
            self.nodes.store_chunks(operator, request),
        )
        .await;
        (operator, positions, reply)
    }

    fn tally(
        &self,
        blob: &EncodedBlobRef,
        blob_header_hash: Hash,
        signed: BTreeMap<OperatorId, BlobAttestation>,
        state: &OperatorState,
    ) -> BlobDispatchOutcome {
        let mut sufficient = true;
        let quorum_results: Vec<QuorumResult> = blob
            .header
            .security_params
            .iter()
            .map(|param| {
                let total = state.total_stake(param.quorum_id);
                let signed_stake: u128 = signed
                    .keys()
                    .filter_map(|id| state.get(id))
                    .map(|op| op.stake(param.quorum_id) as u128)
                    .sum();
                let percent = stake_percent(signed_stake, total);
                self.metrics.set_attestation_stake(param.quorum_id, percent);
                if !meets_threshold(signed_stake, total, param.quorum_threshold) {
                    sufficient = false;
                }
                QuorumResult {
                    quorum_id: param.quorum_id,
                    signed_stake_percent: percent,
                }
            })
            .collect();

        BlobDispatchOutcome {
            key: blob.key,
            blob_header_hash,
            commitment: blob.header.commitment,
            attestations: signed.into_values().collect(),
            quorum_results,
            sufficient,
        }
    }
}

/// First quorum that fell short, as a retryable error.
pub fn insufficient_error(
    outcome: &BlobDispatchOutcome,
    blob: &EncodedBlobRef,
) -> Option<BatcherError> {
    blob.header
        .security_params
        .iter()
        .zip(&outcome.quorum_results)
        .find(|(param, result)| result.signed_stake_percent < param.quorum_threshold)
        .map(|(param, result)| BatcherError::InsufficientAcknowledgement {
            quorum: param.quorum_id,
            signed_percent: result.signed_stake_percent,
            threshold: param.quorum_threshold,
        })
        .or_else(|| {
            (!outcome.sufficient).then(|| BatcherError::Dispatch("attestation below threshold".into()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::encoding_params;
    use crate::ports::EncoderClient;
    use crate::test_utils::{operator_set, ScriptedEncoder, ScriptedStorageNodes};

    async fn blob_ref(state: &OperatorState, payload: &[u8], params: &[SecurityParam]) -> EncodedBlobRef {
        let encoder = ScriptedEncoder::new();
        let encoded = encoder
            .encode(payload, &encoding_params(state, params).unwrap(), Duration::from_secs(1))
            .await
            .unwrap();
        EncodedBlobRef::new(BlobKey::derive(payload, params), encoded, params)
    }

    fn dispatcher(nodes: Arc<ScriptedStorageNodes>, metrics: BatcherMetrics) -> Dispatcher {
        Dispatcher::new(
            nodes,
            Arc::new(Secp256k1KeyPair::generate()),
            Duration::from_millis(200),
            metrics,
        )
    }

    fn batch_for(blobs: &[EncodedBlobRef], block: u64) -> BatchHeader {
        let hashes: Vec<Hash> = blobs.iter().map(|b| b.header.hash()).collect();
        BatchHeader::build(block, &hashes, blobs.iter().flat_map(|b| &b.header.security_params))
    }

    #[tokio::test]
    async fn test_all_operators_attest() {
        let (state, keys) = operator_set(10, &[(0, 4)]);
        let nodes = Arc::new(ScriptedStorageNodes::new(keys));
        let params = [SecurityParam::new(0, 33, 67)];
        let blobs = vec![blob_ref(&state, b"one", &params).await, blob_ref(&state, b"two", &params).await];

        let result = dispatcher(nodes.clone(), BatcherMetrics::new())
            .dispatch(&batch_for(&blobs, 10), &blobs, &state)
            .await;

        assert_eq!(result.acknowledged.len(), 4);
        assert!(result.failed.is_empty());
        assert_eq!(result.per_blob.len(), 2);
        for outcome in &result.per_blob {
            assert!(outcome.sufficient);
            assert_eq!(outcome.attestations.len(), 4);
            assert_eq!(outcome.quorum_results[0].signed_stake_percent, 100);
        }
        // One request per operator carrying both blobs
        assert_eq!(nodes.requests(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_operators_reduce_stake() {
        let (state, keys) = operator_set(10, &[(0, 4)]);
        let ids: Vec<OperatorId> = state.operators.keys().copied().collect();
        let nodes = Arc::new(ScriptedStorageNodes::new(keys));
        nodes.hang(ids[0]);
        nodes.hang(ids[1]);
        let params = [SecurityParam::new(0, 33, 67)];
        let blobs = vec![blob_ref(&state, b"one", &params).await];

        let result = dispatcher(nodes, BatcherMetrics::new())
            .dispatch(&batch_for(&blobs, 10), &blobs, &state)
            .await;

        assert_eq!(result.failed.len(), 2);
        let outcome = &result.per_blob[0];
        assert!(!outcome.sufficient);
        assert_eq!(outcome.quorum_results[0].signed_stake_percent, 50);
        let err = insufficient_error(outcome, &blobs[0]).unwrap();
        assert!(matches!(
            err,
            BatcherError::InsufficientAcknowledgement {
                quorum: 0,
                signed_percent: 50,
                threshold: 67
            }
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_forged_signature_is_discarded() {
        let (state, keys) = operator_set(10, &[(0, 3)]);
        let ids: Vec<OperatorId> = state.operators.keys().copied().collect();
        let nodes = Arc::new(ScriptedStorageNodes::new(keys));
        nodes.forge(ids[2]);
        let params = [SecurityParam::new(0, 33, 60)];
        let blobs = vec![blob_ref(&state, b"one", &params).await];

        let result = dispatcher(nodes, BatcherMetrics::new())
            .dispatch(&batch_for(&blobs, 10), &blobs, &state)
            .await;

        assert!(result.failed.contains(&ids[2]));
        let outcome = &result.per_blob[0];
        assert_eq!(outcome.attestations.len(), 2);
        assert!(outcome.attestations.iter().all(|a| a.operator != ids[2]));
        assert!(outcome.sufficient);
    }

    #[tokio::test]
    async fn test_every_quorum_must_meet_threshold() {
        // Quorum 1 operators are all forging
        let (state, keys) = operator_set(10, &[(0, 2), (1, 2)]);
        let nodes = Arc::new(ScriptedStorageNodes::new(keys));
        for (id, op) in &state.operators {
            if op.stake(1) > 0 {
                nodes.forge(*id);
            }
        }
        let params = [SecurityParam::new(0, 33, 67), SecurityParam::new(1, 33, 67)];
        let blobs = vec![blob_ref(&state, b"two quorums", &params).await];
        let metrics = BatcherMetrics::new();

        let result = dispatcher(nodes, metrics)
            .dispatch(&batch_for(&blobs, 10), &blobs, &state)
            .await;

        let outcome = &result.per_blob[0];
        assert!(!outcome.sufficient);
        assert_eq!(outcome.quorum_results[0].signed_stake_percent, 100);
        assert_eq!(outcome.quorum_results[1].signed_stake_percent, 0);
    }
}
