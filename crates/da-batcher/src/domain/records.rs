//! Outcomes produced by the dispatch, confirm and finalize stages.

use shared_types::{BlobAttestation, BlobKey, Hash, OperatorId, QuorumResult};
use std::collections::BTreeSet;

/// Dispatch outcome for one blob of a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobDispatchOutcome {
    pub key: BlobKey,
    pub blob_header_hash: Hash,
    pub commitment: Hash,
    /// Valid attestations, ordered by operator id.
    pub attestations: Vec<BlobAttestation>,
    pub quorum_results: Vec<QuorumResult>,
    /// Every requested quorum met its threshold.
    pub sufficient: bool,
}

/// Result of one dispatch fan-out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchResult {
    /// Operators that answered with only valid attestations.
    pub acknowledged: BTreeSet<OperatorId>,
    /// Operators that timed out, errored or returned a bad attestation.
    pub failed: BTreeSet<OperatorId>,
    /// Same order as the blobs passed in.
    pub per_blob: Vec<BlobDispatchOutcome>,
}

/// A dispatched blob handed to the confirmer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchedBlob {
    pub key: BlobKey,
    pub blob_header_hash: Hash,
    pub attestations: Vec<BlobAttestation>,
}

/// Whether every blob of a confirmed batch took the `Confirmed` status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmationStatus {
    Confirmed,
    /// The transaction landed but some blobs had moved on concurrently.
    PartiallyRecorded { conflicts: Vec<BlobKey> },
}

/// A batch recorded on chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmationRecord {
    pub batch_header_hash: Hash,
    pub tx_hash: Hash,
    pub submission_block: u64,
    pub confirmation_block: u64,
    pub blob_keys: Vec<BlobKey>,
    /// Operators whose attestations went into the transaction.
    pub signers: BTreeSet<OperatorId>,
    pub attempts: u32,
    pub status: ConfirmationStatus,
}

/// Finalizer verdict for a single confirmed blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalizationRecord {
    pub batch_header_hash: Hash,
    pub blob_key: BlobKey,
    pub confirmation_block: u64,
    pub chain_head: u64,
    pub finalized: bool,
}

/// Summary of one finalizer pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FinalizationReport {
    pub chain_head: Option<u64>,
    pub records: Vec<FinalizationRecord>,
    pub retried: usize,
    pub failed: usize,
}

impl FinalizationReport {
    pub fn finalized(&self) -> usize {
        self.records.iter().filter(|r| r.finalized).count()
    }

    pub fn pending(&self) -> usize {
        self.records.iter().filter(|r| !r.finalized).count()
    }
}

/// Summary of one batch cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub reference_block: u64,
    pub cut: usize,
    pub encoded: usize,
    pub dispatched: usize,
    pub retried: usize,
    pub failed: usize,
    pub confirmations_started: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.cut == 0
            && self.dispatched == 0
            && self.retried == 0
            && self.failed == 0
            && self.confirmations_started == 0
    }
}
