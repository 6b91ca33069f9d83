//! Legacy (EIP-155) transaction encoding and the confirmation calldata.

use primitive_types::{H160, U256};
use rlp::RlpStream;
use shared_crypto::{keccak256, Secp256k1KeyPair};

use crate::error::{BatcherError, Result};
use crate::ports::{ConfirmBatchCall, TxHash};

/// Solidity signature of the batch confirmation entry point.
pub const CONFIRM_BATCH_SIGNATURE: &str = "confirmBatch(bytes)";

/// Unsigned legacy transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: U256,
    pub gas_price: U256,
    pub gas_limit: U256,
    pub to: H160,
    pub value: U256,
    pub data: Vec<u8>,
}

impl LegacyTransaction {
    fn append_payload(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&self.gas_price);
        stream.append(&self.gas_limit);
        stream.append(&self.to);
        stream.append(&self.value);
        stream.append(&self.data);
    }

    /// Digest signed under EIP-155 replay protection.
    pub fn signing_hash(&self, chain_id: u64) -> TxHash {
        let mut stream = RlpStream::new_list(9);
        self.append_payload(&mut stream);
        stream.append(&chain_id);
        stream.append(&0u8);
        stream.append(&0u8);
        keccak256(&stream.out())
    }

    /// Sign and return the raw transaction bytes with their hash.
    pub fn sign(&self, signer: &Secp256k1KeyPair, chain_id: u64) -> Result<(Vec<u8>, TxHash)> {
        let signature = signer
            .sign_digest(&self.signing_hash(chain_id))
            .map_err(|e| BatcherError::Signing(e.to_string()))?;
        let v = signature.recovery_id as u64 + 35 + chain_id.saturating_mul(2);

        let mut stream = RlpStream::new_list(9);
        self.append_payload(&mut stream);
        stream.append(&v);
        stream.append(&U256::from_big_endian(&signature.r));
        stream.append(&U256::from_big_endian(&signature.s));
        let raw = stream.out().to_vec();
        let hash = keccak256(&raw);
        Ok((raw, hash))
    }
}

/// ABI call data for `confirmBatch(bytes)` carrying the serialized call.
pub fn confirm_batch_calldata(call: &ConfirmBatchCall) -> Result<Vec<u8>> {
    let payload =
        bincode::serialize(call).map_err(|e| BatcherError::Serialization(e.to_string()))?;

    let padded_len = payload.len().div_ceil(32) * 32;
    let mut data = Vec::with_capacity(4 + 64 + padded_len);
    data.extend_from_slice(&keccak256(CONFIRM_BATCH_SIGNATURE.as_bytes())[..4]);
    data.extend_from_slice(&abi_word(32));
    data.extend_from_slice(&abi_word(payload.len() as u64));
    data.extend_from_slice(&payload);
    data.resize(4 + 64 + padded_len, 0);
    Ok(data)
}

fn abi_word(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}
