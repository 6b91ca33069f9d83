//! Blob and batch headers.

use serde::{Deserialize, Serialize};
use shared_crypto::{keccak256, keccak256_concat, merkle_root};
use shared_types::{Hash, QuorumId, SecurityParam};

use super::chunk::EncodedBlob;

/// What storage nodes attest to for a single blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobHeader {
    pub commitment: Hash,
    pub data_length: u64,
    pub security_params: Vec<SecurityParam>,
}

impl BlobHeader {
    pub fn new(encoded: &EncodedBlob, security_params: &[SecurityParam]) -> Self {
        Self {
            commitment: encoded.commitment,
            data_length: encoded.data_length,
            security_params: security_params.to_vec(),
        }
    }

    pub fn hash(&self) -> Hash {
        let mut params = Vec::with_capacity(self.security_params.len() * 3);
        for p in &self.security_params {
            params.extend_from_slice(&[p.quorum_id, p.adversary_threshold, p.quorum_threshold]);
        }
        keccak256_concat(&[
            &self.commitment,
            &self.data_length.to_be_bytes(),
            &params,
        ])
    }

    /// Digest a storage node signs to attest to this blob.
    pub fn attestation_digest(blob_header_hash: &Hash) -> Hash {
        keccak256(blob_header_hash)
    }
}

/// Header of a batch as recorded on chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHeader {
    pub reference_block_number: u64,
    /// Merkle root over the blob header hashes, in batch order.
    pub blob_headers_root: Hash,
    /// Union of the quorums requested by the batch's blobs, ascending.
    pub quorum_numbers: Vec<QuorumId>,
}

impl BatchHeader {
    pub fn build<'a>(
        reference_block_number: u64,
        blob_header_hashes: &[Hash],
        security_params: impl IntoIterator<Item = &'a SecurityParam>,
    ) -> Self {
        let mut quorum_numbers: Vec<QuorumId> =
            security_params.into_iter().map(|p| p.quorum_id).collect();
        quorum_numbers.sort_unstable();
        quorum_numbers.dedup();
        Self {
            reference_block_number,
            blob_headers_root: merkle_root(blob_header_hashes),
            quorum_numbers,
        }
    }

    /// Canonical byte encoding used for hashing.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 32 + self.quorum_numbers.len());
        out.extend_from_slice(&self.reference_block_number.to_be_bytes());
        out.extend_from_slice(&self.blob_headers_root);
        out.extend_from_slice(&self.quorum_numbers);
        out
    }

    pub fn hash(&self) -> Hash {
        keccak256(&self.encode())
    }
}
