//! Error types for the batcher pipeline

use shared_types::{FailureReason, QuorumId, StoreError};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for batcher operations
pub type Result<T> = std::result::Result<T, BatcherError>;

/// Pipeline stage, used to label timeouts, retries and failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Encode,
    Dispatch,
    Confirm,
    Finalize,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Encode => "encode",
            Stage::Dispatch => "dispatch",
            Stage::Confirm => "confirm",
            Stage::Finalize => "finalize",
        }
    }

    /// Reason recorded on a blob that fails permanently in this stage.
    pub fn failure_reason(self) -> FailureReason {
        match self {
            Stage::Encode => FailureReason::EncodingFailed,
            Stage::Dispatch => FailureReason::DispatchFailed,
            Stage::Confirm => FailureReason::ConfirmationFailed,
            Stage::Finalize => FailureReason::FinalizationFailed,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invalid or missing configuration. Always fatal at startup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No encoder address configured
    #[error("encoder socket must be specified")]
    MissingEncoderSocket,

    /// No chain RPC endpoint configured
    #[error("chain rpc url must be specified")]
    MissingChainRpc,

    /// Signing key could not be parsed
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// An interval or timeout that must be positive is zero
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    /// Operator entry could not be parsed
    #[error("invalid operator {id}: {reason}")]
    InvalidOperator {
        /// Operator id as configured
        id: String,
        /// What is wrong with it
        reason: String,
    },

    /// Any other invalid setting
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that can occur while driving blobs through the pipeline
#[derive(Debug, Error)]
pub enum BatcherError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A bounded call did not complete in time
    #[error("{stage} timed out after {after:?}")]
    Timeout {
        /// Stage that issued the call
        stage: Stage,
        /// Configured bound
        after: Duration,
    },

    /// Encoding service failure
    #[error("Encoder error: {0}")]
    Encoder(String),

    /// Storage node transport failure
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Attested stake below the quorum threshold
    #[error("Insufficient acknowledgement for quorum {quorum}: {signed_percent}% signed, {threshold}% required")]
    InsufficientAcknowledgement {
        /// Quorum that fell short
        quorum: QuorumId,
        /// Share of stake that attested
        signed_percent: u8,
        /// Share required
        threshold: u8,
    },

    /// A quorum has no registered operators at the reference block
    #[error("No operators registered for quorum {0}")]
    NoOperators(QuorumId),

    /// Chain RPC failure
    #[error("Chain RPC error: {0}")]
    Chain(String),

    /// The node refused the transaction
    #[error("Transaction rejected: {0}")]
    TransactionRejected(String),

    /// The transaction was mined but reverted
    #[error("Transaction {tx_hash} reverted")]
    TransactionFailed {
        /// Hex transaction hash
        tx_hash: String,
    },

    /// Batch gave up after the per-blob retry ceiling was hit
    #[error("Batch {batch} abandoned after {attempts} confirmation attempts: {last_error}")]
    BatchAbandoned {
        /// Hex batch header hash
        batch: String,
        /// Attempts made in the final run
        attempts: u32,
        /// Error of the last attempt
        last_error: String,
    },

    /// Stage preconditions no longer hold (e.g. a blob moved concurrently)
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Blob store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Signing failure
    #[error("Signing error: {0}")]
    Signing(String),

    /// Encoding of a payload failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The process is shutting down
    #[error("Shutting down")]
    Shutdown,
}

impl BatcherError {
    /// Whether another attempt could succeed without operator intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            BatcherError::Timeout { .. }
            | BatcherError::Encoder(_)
            | BatcherError::Dispatch(_)
            | BatcherError::InsufficientAcknowledgement { .. }
            | BatcherError::NoOperators(_)
            | BatcherError::Chain(_) => true,
            BatcherError::TransactionRejected(reason) => is_transient_rejection(reason),
            BatcherError::Config(_)
            | BatcherError::TransactionFailed { .. }
            | BatcherError::BatchAbandoned { .. }
            | BatcherError::Precondition(_)
            | BatcherError::Store(_)
            | BatcherError::Signing(_)
            | BatcherError::Serialization(_)
            | BatcherError::Shutdown => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BatcherError::Timeout { .. })
    }
}

/// Nonce races and fee problems clear up on resubmission.
fn is_transient_rejection(reason: &str) -> bool {
    let reason = reason.to_ascii_lowercase();
    [
        "nonce too low",
        "underpriced",
        "replacement transaction",
        "already known",
        "nonce too high",
    ]
    .iter()
    .any(|needle| reason.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_are_distinct_and_retryable() {
        let err = BatcherError::Timeout {
            stage: Stage::Dispatch,
            after: Duration::from_secs(3),
        };
        assert!(err.is_timeout());
        assert!(err.is_retryable());
        assert!(!BatcherError::Dispatch("connection reset".into()).is_timeout());
    }

    #[test]
    fn test_transaction_rejections() {
        assert!(BatcherError::TransactionRejected("nonce too low".into()).is_retryable());
        assert!(
            BatcherError::TransactionRejected("Transaction Underpriced".into()).is_retryable()
        );
        assert!(!BatcherError::TransactionRejected("execution reverted".into()).is_retryable());
    }

    #[test]
    fn test_config_errors_are_fatal() {
        let err: BatcherError = ConfigError::MissingEncoderSocket.into();
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Configuration error: encoder socket must be specified"
        );
    }

    #[test]
    fn test_stage_failure_reasons_are_distinct() {
        assert_eq!(
            Stage::Finalize.failure_reason(),
            FailureReason::FinalizationFailed
        );
        assert_ne!(
            Stage::Dispatch.failure_reason(),
            Stage::Confirm.failure_reason()
        );
    }
}
