//! # Hashing
//!
//! Keccak-256 throughout, matching what the confirmation contract checks.

use sha3::{Digest, Keccak256};

/// 256-bit hash output.
pub type Hash = [u8; 32];

/// Keccak-256 (one-shot).
pub fn keccak256(data: &[u8]) -> Hash {
    Keccak256::digest(data).into()
}

/// Keccak-256 over the concatenation of several inputs.
pub fn keccak256_concat(inputs: &[&[u8]]) -> Hash {
    let mut hasher = Keccak256::new();
    for input in inputs {
        hasher.update(input);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak_empty_vector() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_streaming_matches_oneshot() {
        assert_eq!(
            keccak256(b"hello world"),
            keccak256_concat(&[b"hello ", b"world"])
        );
    }
}
