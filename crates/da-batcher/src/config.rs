//! Configuration types for the batcher pipeline

use serde::Deserialize;
use shared_crypto::{Secp256k1KeyPair, Secp256k1PublicKey};
use shared_types::{OperatorId, QuorumId};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Pipeline configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    /// Interval between batch cycles (milliseconds)
    pub pull_interval_ms: u64,

    /// Address of the encoding service, e.g. `http://encoder:34000`
    pub encoder_socket: String,

    /// Maximum number of blobs cut into one batch
    pub max_batch_blobs: usize,

    /// Byte budget of one batch. A single oversize blob still forms a batch on its own.
    pub max_batch_bytes: u64,

    /// Concurrent encoder calls per cycle
    pub num_encoding_workers: usize,

    /// Retry ceiling shared by every stage, counted per blob
    pub max_num_retries_per_blob: u32,

    /// First backoff step for in-call retries (milliseconds)
    pub retry_backoff_base_ms: u64,

    /// Backoff cap (milliseconds)
    pub retry_backoff_max_ms: u64,

    /// Interval between finalizer passes (seconds)
    pub finalizer_interval_secs: u64,

    /// Blocks a confirmation must be buried under before finalization
    pub finalization_interval: u64,

    /// Confirmed blobs examined per finalizer pass
    pub finalizer_batch_limit: usize,

    /// Interval between receipt polls while confirming (milliseconds)
    pub confirmation_poll_interval_ms: u64,

    /// Per-stage timeouts
    pub timeouts: TimeoutConfig,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            pull_interval_ms: 5_000,
            encoder_socket: String::new(),
            max_batch_blobs: 64,
            max_batch_bytes: 16 * 1024 * 1024, // 16MB
            num_encoding_workers: 8,
            max_num_retries_per_blob: 2,
            retry_backoff_base_ms: 500,
            retry_backoff_max_ms: 10_000,
            finalizer_interval_secs: 360,
            finalization_interval: 64,
            finalizer_batch_limit: 1_000,
            confirmation_poll_interval_ms: 1_000,
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl BatcherConfig {
    pub fn pull_interval(&self) -> Duration {
        Duration::from_millis(self.pull_interval_ms)
    }

    pub fn finalizer_interval(&self) -> Duration {
        Duration::from_secs(self.finalizer_interval_secs)
    }

    pub fn confirmation_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirmation_poll_interval_ms)
    }

    pub fn retry_backoff_base(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_base_ms)
    }

    pub fn retry_backoff_max(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_max_ms)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.encoder_socket.trim().is_empty() {
            return Err(ConfigError::MissingEncoderSocket);
        }
        let positive = [
            ("pull_interval_ms", self.pull_interval_ms),
            ("max_batch_blobs", self.max_batch_blobs as u64),
            ("max_batch_bytes", self.max_batch_bytes),
            ("num_encoding_workers", self.num_encoding_workers as u64),
            ("finalizer_interval_secs", self.finalizer_interval_secs),
            ("finalizer_batch_limit", self.finalizer_batch_limit as u64),
            ("confirmation_poll_interval_ms", self.confirmation_poll_interval_ms),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::ZeroValue(name));
            }
        }
        if self.retry_backoff_base_ms > self.retry_backoff_max_ms {
            return Err(ConfigError::Invalid(format!(
                "retry_backoff_base_ms ({}) exceeds retry_backoff_max_ms ({})",
                self.retry_backoff_base_ms, self.retry_backoff_max_ms
            )));
        }
        self.timeouts.validate()
    }
}

/// Bounds on every suspension point
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Encoder call (milliseconds)
    pub encoding_timeout_ms: u64,

    /// Per storage node dispatch call (milliseconds)
    pub attestation_timeout_ms: u64,

    /// Any chain read (milliseconds)
    pub chain_read_timeout_ms: u64,

    /// Transaction submission (milliseconds)
    pub chain_write_timeout_ms: u64,

    /// Deadline for a confirmation receipt to appear (milliseconds)
    pub confirmation_timeout_ms: u64,

    /// Time granted to in-flight confirmations at shutdown (seconds)
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            encoding_timeout_ms: 10_000,
            attestation_timeout_ms: 20_000,
            chain_read_timeout_ms: 5_000,
            chain_write_timeout_ms: 90_000,
            confirmation_timeout_ms: 180_000,
            shutdown_grace_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn encoding(&self) -> Duration {
        Duration::from_millis(self.encoding_timeout_ms)
    }

    pub fn attestation(&self) -> Duration {
        Duration::from_millis(self.attestation_timeout_ms)
    }

    pub fn chain_read(&self) -> Duration {
        Duration::from_millis(self.chain_read_timeout_ms)
    }

    pub fn chain_write(&self) -> Duration {
        Duration::from_millis(self.chain_write_timeout_ms)
    }

    pub fn confirmation(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("encoding_timeout_ms", self.encoding_timeout_ms),
            ("attestation_timeout_ms", self.attestation_timeout_ms),
            ("chain_read_timeout_ms", self.chain_read_timeout_ms),
            ("chain_write_timeout_ms", self.chain_write_timeout_ms),
            ("confirmation_timeout_ms", self.confirmation_timeout_ms),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::ZeroValue(name));
            }
        }
        Ok(())
    }
}

/// Chain client settings
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// JSON-RPC endpoint
    pub rpc_url: String,

    /// Hex-encoded secp256k1 secret key of the batcher account
    pub private_key: String,

    /// EIP-155 chain id
    pub chain_id: u64,

    /// Hex address of the batch confirmation contract
    pub contract_address: String,

    /// Gas limit of confirmation transactions
    pub gas_limit: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            private_key: String::new(),
            chain_id: 16600,
            contract_address: String::new(),
            gas_limit: 2_000_000,
        }
    }
}

impl std::fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainConfig")
            .field("rpc_url", &self.rpc_url)
            .field("private_key", &"<redacted>")
            .field("chain_id", &self.chain_id)
            .field("contract_address", &self.contract_address)
            .field("gas_limit", &self.gas_limit)
            .finish()
    }
}

impl ChainConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_url.trim().is_empty() {
            return Err(ConfigError::MissingChainRpc);
        }
        self.signer()?;
        self.contract()?;
        if self.gas_limit == 0 {
            return Err(ConfigError::ZeroValue("gas_limit"));
        }
        Ok(())
    }

    /// Parse the configured signing key.
    pub fn signer(&self) -> Result<Secp256k1KeyPair, ConfigError> {
        Secp256k1KeyPair::from_hex(&self.private_key)
            .map_err(|e| ConfigError::InvalidPrivateKey(e.to_string()))
    }

    /// Parse the contract address.
    pub fn contract(&self) -> Result<[u8; 20], ConfigError> {
        let raw = self
            .contract_address
            .strip_prefix("0x")
            .unwrap_or(&self.contract_address);
        hex::decode(raw)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "contract_address {:?} is not a 20-byte hex address",
                    self.contract_address
                ))
            })
    }
}

/// Stake held by an operator in one quorum
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct QuorumStake {
    pub quorum: QuorumId,
    pub stake: u64,
}

/// A registered storage-node operator
#[derive(Clone, Debug, Deserialize)]
pub struct OperatorConfig {
    /// Hex operator id (32 bytes)
    pub id: String,

    /// Base URL of the node's dispatch endpoint
    pub socket: String,

    /// Hex SEC1 public key the node signs attestations with
    pub public_key: String,

    /// Stake per quorum
    pub stakes: Vec<QuorumStake>,
}

impl OperatorConfig {
    pub fn operator_id(&self) -> Result<OperatorId, ConfigError> {
        OperatorId::from_hex(&self.id).ok_or_else(|| ConfigError::InvalidOperator {
            id: self.id.clone(),
            reason: "id must be 32 bytes of hex".into(),
        })
    }

    pub fn verifying_key(&self) -> Result<Secp256k1PublicKey, ConfigError> {
        Secp256k1PublicKey::from_hex(&self.public_key).map_err(|e| ConfigError::InvalidOperator {
            id: self.id.clone(),
            reason: e.to_string(),
        })
    }
}

/// Storage node network as seen by the batcher
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct StorageNodeConfig {
    pub operators: Vec<OperatorConfig>,
}

/// Blob store backend selection
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Rocksdb,
}

/// Blob store settings
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Database directory for durable backends
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: PathBuf::from("./data/blobs"),
        }
    }
}
