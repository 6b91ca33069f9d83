//! Encoding requests and their results.

use serde::{Deserialize, Serialize};
use shared_types::{Hash, QuorumId};

/// What the encoder must produce for one quorum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingParams {
    pub quorum_id: QuorumId,
    /// One chunk per operator registered in the quorum.
    pub num_chunks: u32,
    pub adversary_threshold: u8,
    pub quorum_threshold: u8,
}

/// Fragment of an encoded blob destined for one operator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedChunk {
    pub quorum_id: QuorumId,
    pub index: u32,
    pub data: Vec<u8>,
}

/// Encoder output for a blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedBlob {
    /// Commitment over the encoded data, reproduced on every re-encode.
    pub commitment: Hash,
    /// Length of the original payload.
    pub data_length: u64,
    pub chunks: Vec<EncodedChunk>,
}

impl EncodedBlob {
    /// Chunks of one quorum in index order.
    pub fn quorum_chunks(&self, quorum_id: QuorumId) -> Vec<&EncodedChunk> {
        let mut chunks: Vec<&EncodedChunk> = self
            .chunks
            .iter()
            .filter(|c| c.quorum_id == quorum_id)
            .collect();
        chunks.sort_by_key(|c| c.index);
        chunks
    }

    /// True if the chunk layout is what `params` asked for.
    pub fn matches(&self, params: &[EncodingParams]) -> bool {
        params.iter().all(|p| {
            let chunks = self.quorum_chunks(p.quorum_id);
            chunks.len() == p.num_chunks as usize
                && chunks.iter().enumerate().all(|(i, c)| c.index == i as u32)
        })
    }

    pub fn encoded_size(&self) -> usize {
        self.chunks.iter().map(|c| c.data.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(quorum_id: QuorumId, index: u32) -> EncodedChunk {
        EncodedChunk {
            quorum_id,
            index,
            data: vec![index as u8; 4],
        }
    }

    fn params(quorum_id: QuorumId, num_chunks: u32) -> EncodingParams {
        EncodingParams {
            quorum_id,
            num_chunks,
            adversary_threshold: 33,
            quorum_threshold: 67,
        }
    }

    #[test]
    fn test_matches_requested_layout() {
        let blob = EncodedBlob {
            commitment: [1u8; 32],
            data_length: 10,
            chunks: vec![chunk(0, 1), chunk(0, 0), chunk(1, 0)],
        };
        assert!(blob.matches(&[params(0, 2), params(1, 1)]));
        assert!(!blob.matches(&[params(0, 3)]));
        assert!(!blob.matches(&[params(2, 1)]));
        assert_eq!(blob.encoded_size(), 12);
    }

    #[test]
    fn test_quorum_chunks_sorted() {
        let blob = EncodedBlob {
            commitment: [1u8; 32],
            data_length: 10,
            chunks: vec![chunk(0, 2), chunk(0, 0), chunk(0, 1)],
        };
        let indices: Vec<u32> = blob.quorum_chunks(0).iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
