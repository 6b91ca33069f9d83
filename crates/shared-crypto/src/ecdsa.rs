//! # ECDSA Signatures (secp256k1)
//!
//! Signing and verification over 32-byte digests.
//!
//! ## Security Properties
//!
//! - RFC 6979 deterministic nonces (no RNG dependency for signing)
//! - Low-S normalization (EIP-2)
//! - Constant-time operations
//!
//! ## Use Cases
//!
//! - Confirmation transaction signing (EIP-155)
//! - Dispatch request authentication towards storage nodes
//! - Verification of per-blob node attestations

use crate::hashing::keccak256;
use crate::CryptoError;
use k256::ecdsa::{signature::hazmat::PrehashVerifier, RecoveryId, Signature, SigningKey, VerifyingKey};
use zeroize::Zeroize;

/// Compressed secp256k1 public key (33 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Secp256k1PublicKey([u8; 33]);

impl Secp256k1PublicKey {
    /// Parse SEC1 bytes, compressed (33) or uncompressed (65).
    pub fn from_sec1(bytes: &[u8]) -> Result<Self, CryptoError> {
        let verifying_key =
            VerifyingKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self::from_verifying_key(&verifying_key))
    }

    /// Parse a `0x`-prefixed (or bare) hex encoding of SEC1 bytes.
    pub fn from_hex(value: &str) -> Result<Self, CryptoError> {
        let raw = value.strip_prefix("0x").unwrap_or(value);
        let bytes = hex::decode(raw).map_err(|_| CryptoError::InvalidPublicKey)?;
        Self::from_sec1(&bytes)
    }

    fn from_verifying_key(verifying_key: &VerifyingKey) -> Self {
        let point = verifying_key.to_encoded_point(true);
        let mut bytes = [0u8; 33];
        bytes.copy_from_slice(point.as_bytes());
        Self(bytes)
    }

    /// Get raw compressed bytes.
    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    /// Verify a signature over a 32-byte digest.
    ///
    /// Accepts `r||s` (64 bytes) or `r||s||v` (65 bytes); `v` is ignored.
    pub fn verify_digest(&self, digest: &[u8; 32], signature: &[u8]) -> Result<(), CryptoError> {
        if signature.len() != 64 && signature.len() != 65 {
            return Err(CryptoError::InvalidSignatureFormat);
        }
        let verifying_key =
            VerifyingKey::from_sec1_bytes(&self.0).map_err(|_| CryptoError::InvalidPublicKey)?;
        let sig =
            Signature::from_slice(&signature[..64]).map_err(|_| CryptoError::InvalidSignatureFormat)?;

        verifying_key
            .verify_prehash(digest, &sig)
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }

    /// Ethereum address: last 20 bytes of keccak256 over the uncompressed point.
    pub fn address(&self) -> Result<[u8; 20], CryptoError> {
        let verifying_key =
            VerifyingKey::from_sec1_bytes(&self.0).map_err(|_| CryptoError::InvalidPublicKey)?;
        let uncompressed = verifying_key.to_encoded_point(false);
        let hash = keccak256(&uncompressed.as_bytes()[1..]);
        let mut address = [0u8; 20];
        address.copy_from_slice(&hash[12..]);
        Ok(address)
    }
}

/// ECDSA signature with its recovery id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecoverableSignature {
    /// R scalar, big-endian.
    pub r: [u8; 32],
    /// S scalar, big-endian, always in the lower half of the order.
    pub s: [u8; 32],
    /// Recovery id (0 or 1).
    pub recovery_id: u8,
}

impl RecoverableSignature {
    /// `r||s||v` with `v` as the raw recovery id.
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut bytes = [0u8; 65];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..64].copy_from_slice(&self.s);
        bytes[64] = self.recovery_id;
        bytes
    }
}

/// secp256k1 ECDSA keypair.
pub struct Secp256k1KeyPair {
    signing_key: SigningKey,
}

impl Secp256k1KeyPair {
    /// Generate random keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut rand::thread_rng());
        Self { signing_key }
    }

    /// Create from secret key bytes (32 bytes).
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_bytes((&bytes).into()).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { signing_key })
    }

    /// Create from a `0x`-prefixed (or bare) hex secret key.
    pub fn from_hex(value: &str) -> Result<Self, CryptoError> {
        let raw = value.trim().strip_prefix("0x").unwrap_or(value.trim());
        let mut decoded = hex::decode(raw).map_err(|_| CryptoError::InvalidPrivateKey)?;
        let bytes: Result<[u8; 32], _> = decoded.as_slice().try_into();
        decoded.zeroize();
        let mut bytes = bytes.map_err(|_| CryptoError::InvalidPrivateKey)?;
        let keypair = Self::from_bytes(bytes);
        bytes.zeroize();
        keypair
    }

    /// Get public key (compressed, 33 bytes).
    pub fn public_key(&self) -> Secp256k1PublicKey {
        Secp256k1PublicKey::from_verifying_key(self.signing_key.verifying_key())
    }

    /// Ethereum address of this key.
    pub fn address(&self) -> Result<[u8; 20], CryptoError> {
        self.public_key().address()
    }

    /// Sign a 32-byte digest (deterministic RFC 6979, low-S).
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<RecoverableSignature, CryptoError> {
        let (sig, recid) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;

        // Flipping S mirrors R's y-parity
        let (sig, recid) = match sig.normalize_s() {
            Some(normalized) => (
                normalized,
                RecoveryId::new(!recid.is_y_odd(), recid.is_x_reduced()),
            ),
            None => (sig, recid),
        };

        let sig_bytes = sig.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&sig_bytes[..32]);
        s.copy_from_slice(&sig_bytes[32..]);

        Ok(RecoverableSignature {
            r,
            s,
            recovery_id: recid.to_byte(),
        })
    }
}

impl Drop for Secp256k1KeyPair {
    fn drop(&mut self) {
        // Zeroize secret key material
        let mut bytes: [u8; 32] = self.signing_key.to_bytes().into();
        bytes.zeroize();
    }
}

impl std::fmt::Debug for Secp256k1KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secp256k1KeyPair")
            .field("public_key", &hex::encode(self.public_key().as_bytes()))
            .finish()
    }
}
