//! # Error Types
//!
//! Errors raised by blob store implementations.

use thiserror::Error;

use crate::entities::BlobKey;

/// Errors that can occur in a blob store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// No blob with this key exists.
    #[error("Blob not found: {0}")]
    NotFound(BlobKey),

    /// The submission failed validation.
    #[error("Submission rejected: {0}")]
    Rejected(String),

    /// The underlying database failed.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// A stored record could not be encoded or decoded.
    #[error("Record codec error: {0}")]
    Codec(String),
}
