//! Operator set and stake thresholds.

use shared_crypto::Secp256k1PublicKey;
use shared_types::{OperatorId, QuorumId};
use std::collections::BTreeMap;

/// A storage-node operator registered at some block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operator {
    pub id: OperatorId,
    pub socket: String,
    pub public_key: Secp256k1PublicKey,
    pub stakes: BTreeMap<QuorumId, u64>,
}

impl Operator {
    pub fn stake(&self, quorum_id: QuorumId) -> u64 {
        self.stakes.get(&quorum_id).copied().unwrap_or(0)
    }
}

/// Operators registered at a reference block, keyed and ordered by id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OperatorState {
    pub block_number: u64,
    pub operators: BTreeMap<OperatorId, Operator>,
}

impl OperatorState {
    pub fn new(block_number: u64, operators: impl IntoIterator<Item = Operator>) -> Self {
        Self {
            block_number,
            operators: operators.into_iter().map(|op| (op.id, op)).collect(),
        }
    }

    /// Operators with stake in the quorum, ordered by id.
    pub fn quorum_operators(&self, quorum_id: QuorumId) -> Vec<&Operator> {
        self.operators
            .values()
            .filter(|op| op.stake(quorum_id) > 0)
            .collect()
    }

    pub fn total_stake(&self, quorum_id: QuorumId) -> u128 {
        self.operators
            .values()
            .map(|op| op.stake(quorum_id) as u128)
            .sum()
    }

    pub fn get(&self, id: &OperatorId) -> Option<&Operator> {
        self.operators.get(id)
    }
}

/// `signed / total >= threshold%`, evaluated without division.
pub fn meets_threshold(signed_stake: u128, total_stake: u128, threshold_percent: u8) -> bool {
    total_stake > 0 && signed_stake * 100 >= total_stake * threshold_percent as u128
}

/// Signed share of the stake, rounded down.
pub fn stake_percent(signed_stake: u128, total_stake: u128) -> u8 {
    if total_stake == 0 {
        return 0;
    }
    (signed_stake.min(total_stake) * 100 / total_stake) as u8
}
