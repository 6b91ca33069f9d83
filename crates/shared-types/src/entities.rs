//! # Core Domain Entities
//!
//! Blobs, their identity and the progress records each pipeline stage
//! attaches to them.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::collections::BTreeSet;
use std::fmt;

use crate::errors::StoreError;
use crate::status::{BlobStatus, FailureReason, StatusUpdate};

/// A 32-byte keccak-256 hash.
pub type Hash = [u8; 32];

/// A 20-byte Ethereum-style address.
pub type Address = [u8; 20];

/// Identifier of a quorum (a redundancy/trust group of storage nodes).
pub type QuorumId = u8;

// =============================================================================
// IDENTITIES
// =============================================================================

/// Content-derived identity of a blob.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobKey(pub Hash);

impl BlobKey {
    /// Derive the key from the payload and the requested security parameters.
    ///
    /// Identical payloads submitted with identical parameters map to the same key.
    pub fn derive(data: &[u8], params: &[SecurityParam]) -> Self {
        let mut hasher = Keccak256::new();
        hasher.update((data.len() as u64).to_be_bytes());
        hasher.update(data);
        for param in params {
            hasher.update([
                param.quorum_id,
                param.adversary_threshold,
                param.quorum_threshold,
            ]);
        }
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }

    /// Parse a `0x`-prefixed (or bare) hex string.
    pub fn from_hex(value: &str) -> Option<Self> {
        decode_fixed::<32>(value).map(Self)
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobKey({})", self.short())
    }
}

/// Identity of a storage-node operator as registered on chain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperatorId(pub [u8; 32]);

impl OperatorId {
    pub fn from_hex(value: &str) -> Option<Self> {
        decode_fixed::<32>(value).map(Self)
    }

    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperatorId({})", self.short())
    }
}

fn decode_fixed<const N: usize>(value: &str) -> Option<[u8; N]> {
    let raw = value.strip_prefix("0x").unwrap_or(value);
    let bytes = hex::decode(raw).ok()?;
    bytes.try_into().ok()
}

// =============================================================================
// SUBMISSION
// =============================================================================

/// Redundancy requirements of a blob for one quorum.
///
/// Thresholds are percentages of the quorum's total stake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityParam {
    pub quorum_id: QuorumId,
    /// Maximum stake share assumed to be adversarial.
    pub adversary_threshold: u8,
    /// Minimum stake share that must attest before confirmation.
    pub quorum_threshold: u8,
}

impl SecurityParam {
    pub fn new(quorum_id: QuorumId, adversary_threshold: u8, quorum_threshold: u8) -> Self {
        Self {
            quorum_id,
            adversary_threshold,
            quorum_threshold,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.adversary_threshold < self.quorum_threshold && self.quorum_threshold <= 100
    }
}

/// A blob as handed to `BlobStore::enqueue`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobSubmission {
    pub data: Vec<u8>,
    pub security_params: Vec<SecurityParam>,
}

impl BlobSubmission {
    pub fn new(data: impl Into<Vec<u8>>, security_params: Vec<SecurityParam>) -> Self {
        Self {
            data: data.into(),
            security_params,
        }
    }

    /// Reject submissions the pipeline could never confirm.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.data.is_empty() {
            return Err(StoreError::Rejected("blob payload is empty".into()));
        }
        if self.security_params.is_empty() {
            return Err(StoreError::Rejected(
                "at least one quorum must be requested".into(),
            ));
        }
        let mut seen = BTreeSet::new();
        for param in &self.security_params {
            if !param.is_valid() {
                return Err(StoreError::Rejected(format!(
                    "invalid thresholds for quorum {}: adversary {} / quorum {}",
                    param.quorum_id, param.adversary_threshold, param.quorum_threshold
                )));
            }
            if !seen.insert(param.quorum_id) {
                return Err(StoreError::Rejected(format!(
                    "quorum {} requested twice",
                    param.quorum_id
                )));
            }
        }
        Ok(())
    }

    pub fn key(&self) -> BlobKey {
        BlobKey::derive(&self.data, &self.security_params)
    }
}

// =============================================================================
// PROGRESS RECORDS
// =============================================================================

/// A storage node's signature over a blob header hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobAttestation {
    pub operator: OperatorId,
    pub signature: Vec<u8>,
}

/// Share of a quorum's stake that attested to a blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumResult {
    pub quorum_id: QuorumId,
    pub signed_stake_percent: u8,
}

/// Recorded when a blob moves `Encoded -> Dispatched`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchInfo {
    /// Chain block whose operator set received the chunks.
    pub reference_block_number: u64,
    pub blob_header_hash: Hash,
    pub commitment: Hash,
    pub attestations: Vec<BlobAttestation>,
    pub quorum_results: Vec<QuorumResult>,
}

/// Recorded when a blob moves `Dispatched -> Confirmed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationInfo {
    pub batch_header_hash: Hash,
    /// Position of the blob inside the confirmed batch.
    pub blob_index: u32,
    pub tx_hash: Hash,
    /// Chain head when the transaction was submitted.
    pub submission_block: u64,
    /// Block that included the confirmation transaction.
    pub confirmation_block: u64,
}

// =============================================================================
// STORED BLOB
// =============================================================================

/// Everything the store tracks about a blob except its payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    pub key: BlobKey,
    pub status: BlobStatus,
    pub num_retries: u32,
    /// Submission time, milliseconds since the unix epoch.
    pub submitted_at_ms: u64,
    pub data_len: u64,
    pub security_params: Vec<SecurityParam>,
    pub dispatch: Option<DispatchInfo>,
    pub confirmation: Option<ConfirmationInfo>,
    pub failure: Option<FailureReason>,
}

impl BlobMetadata {
    pub fn new(key: BlobKey, submission: &BlobSubmission, submitted_at_ms: u64) -> Self {
        Self {
            key,
            status: BlobStatus::Queued,
            num_retries: 0,
            submitted_at_ms,
            data_len: submission.data.len() as u64,
            security_params: submission.security_params.clone(),
            dispatch: None,
            confirmation: None,
            failure: None,
        }
    }

    pub fn quorum_ids(&self) -> Vec<QuorumId> {
        self.security_params.iter().map(|p| p.quorum_id).collect()
    }

    /// Compare-and-swap the status.
    ///
    /// Returns `false` (and leaves the metadata untouched) when the current
    /// status is not `expected` or the status machine forbids the move.
    pub fn apply(&mut self, expected: BlobStatus, update: &StatusUpdate) -> bool {
        if self.status != expected || !expected.can_transition_to(update.to) {
            return false;
        }
        self.status = update.to;
        if let Some(dispatch) = &update.dispatch {
            self.dispatch = Some(dispatch.clone());
        }
        if let Some(confirmation) = &update.confirmation {
            self.confirmation = Some(confirmation.clone());
        }
        if let Some(reason) = update.failure {
            self.failure = Some(reason);
        }
        true
    }
}

/// A stored blob: payload plus metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    pub data: Vec<u8>,
    pub metadata: BlobMetadata,
}

impl Blob {
    pub fn key(&self) -> BlobKey {
        self.metadata.key
    }

    pub fn status(&self) -> BlobStatus {
        self.metadata.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Vec<SecurityParam> {
        vec![SecurityParam::new(0, 33, 67)]
    }

    #[test]
    fn test_key_is_content_derived() {
        let a = BlobKey::derive(b"hello", &params());
        let b = BlobKey::derive(b"hello", &params());
        let c = BlobKey::derive(b"hellp", &params());
        let d = BlobKey::derive(b"hello", &[SecurityParam::new(1, 33, 67)]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_key_hex_roundtrip() {
        let key = BlobKey::derive(b"payload", &params());
        assert_eq!(BlobKey::from_hex(&key.to_string()), Some(key));
        assert_eq!(BlobKey::from_hex("0x1234"), None);
    }

    #[test]
    fn test_submission_validation() {
        assert!(BlobSubmission::new(b"data".to_vec(), params()).validate().is_ok());
        assert!(BlobSubmission::new(Vec::new(), params()).validate().is_err());
        assert!(BlobSubmission::new(b"data".to_vec(), vec![]).validate().is_err());

        let inverted = vec![SecurityParam::new(0, 70, 60)];
        assert!(BlobSubmission::new(b"data".to_vec(), inverted).validate().is_err());

        let duplicated = vec![SecurityParam::new(0, 33, 67), SecurityParam::new(0, 20, 50)];
        assert!(BlobSubmission::new(b"data".to_vec(), duplicated)
            .validate()
            .is_err());
    }

    #[test]
    fn test_apply_is_compare_and_swap() {
        let submission = BlobSubmission::new(b"data".to_vec(), params());
        let mut meta = BlobMetadata::new(submission.key(), &submission, 1);

        assert!(!meta.apply(BlobStatus::Encoded, &StatusUpdate::to(BlobStatus::Dispatched)));
        assert_eq!(meta.status, BlobStatus::Queued);

        assert!(meta.apply(BlobStatus::Queued, &StatusUpdate::to(BlobStatus::Encoded)));
        assert!(!meta.apply(BlobStatus::Queued, &StatusUpdate::to(BlobStatus::Encoded)));
        assert_eq!(meta.status, BlobStatus::Encoded);
    }

    #[test]
    fn test_apply_rejects_skipping_stages() {
        let submission = BlobSubmission::new(b"data".to_vec(), params());
        let mut meta = BlobMetadata::new(submission.key(), &submission, 1);
        assert!(!meta.apply(BlobStatus::Queued, &StatusUpdate::to(BlobStatus::Confirmed)));
        assert!(meta.apply(
            BlobStatus::Queued,
            &StatusUpdate::failed(FailureReason::EncodingFailed)
        ));
        assert_eq!(meta.failure, Some(FailureReason::EncodingFailed));
    }

    #[test]
    fn test_metadata_serde() {
        let submission = BlobSubmission::new(b"data".to_vec(), params());
        let meta = BlobMetadata::new(submission.key(), &submission, 42);
        let json = serde_json::to_string(&meta).unwrap();
        let back: BlobMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(meta, back);
    }
}
