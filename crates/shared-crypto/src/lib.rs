//! # Shared Crypto
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `ecdsa` | secp256k1 | Transaction signing, dispatch requests, node attestations |
//! | `hashing` | Keccak-256 | Blob keys, header hashes |
//! | `merkle` | Keccak-256 binary tree | Batch header blob root |
//!
//! ## Security Properties
//!
//! - **secp256k1**: RFC 6979 deterministic, low-S normalization (EIP-2)
//! - Secret key bytes are zeroized on drop

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ecdsa;
pub mod errors;
pub mod hashing;
pub mod merkle;

// Re-exports
pub use ecdsa::{RecoverableSignature, Secp256k1KeyPair, Secp256k1PublicKey};
pub use errors::CryptoError;
pub use hashing::{keccak256, keccak256_concat};
pub use merkle::merkle_root;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
