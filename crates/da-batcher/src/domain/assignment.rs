//! Chunk assignment.
//!
//! Per quorum, operators are taken in id order and chunk `i` goes to
//! operator `i mod n`. The encoder is asked for exactly `n` chunks, so in
//! practice each operator holds one chunk per quorum it belongs to.

use shared_types::{OperatorId, SecurityParam};
use std::collections::BTreeMap;

use super::chunk::{EncodedBlob, EncodedChunk, EncodingParams};
use super::quorum::OperatorState;
use crate::error::{BatcherError, Result};

/// Encoder parameters for a blob under the given operator set.
pub fn encoding_params(
    state: &OperatorState,
    security_params: &[SecurityParam],
) -> Result<Vec<EncodingParams>> {
    security_params
        .iter()
        .map(|param| {
            let operators = state.quorum_operators(param.quorum_id).len();
            if operators == 0 {
                return Err(BatcherError::NoOperators(param.quorum_id));
            }
            Ok(EncodingParams {
                quorum_id: param.quorum_id,
                num_chunks: operators as u32,
                adversary_threshold: param.adversary_threshold,
                quorum_threshold: param.quorum_threshold,
            })
        })
        .collect()
}

/// Chunks each operator must store for this blob.
pub fn assign_chunks(
    state: &OperatorState,
    encoded: &EncodedBlob,
    security_params: &[SecurityParam],
) -> BTreeMap<OperatorId, Vec<EncodedChunk>> {
    let mut assignment: BTreeMap<OperatorId, Vec<EncodedChunk>> = BTreeMap::new();
    for param in security_params {
        let operators = state.quorum_operators(param.quorum_id);
        if operators.is_empty() {
            continue;
        }
        for (i, chunk) in encoded.quorum_chunks(param.quorum_id).into_iter().enumerate() {
            let operator = operators[i % operators.len()];
            assignment
                .entry(operator.id)
                .or_default()
                .push(chunk.clone());
        }
    }
    assignment
}
