//! Port: durable record of blobs and their lifecycle status

use async_trait::async_trait;
use shared_types::{Blob, BlobKey, BlobStatus, BlobSubmission, StatusUpdate, StoreError};

/// Single source of truth for blob status.
///
/// Implementations must make `update_status` a compare-and-swap on the
/// current status so that at most one concurrent writer wins.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist a validated submission as `Queued`.
    ///
    /// Re-submitting identical content returns the existing key.
    async fn enqueue(&self, submission: BlobSubmission) -> Result<BlobKey, StoreError>;

    /// Blobs in `status`, oldest submission first (ties broken by key).
    async fn get_by_status(&self, status: BlobStatus, limit: usize)
        -> Result<Vec<Blob>, StoreError>;

    /// Move `key` from `expected` to `update.to`.
    ///
    /// Returns `Ok(false)` if the blob is no longer in `expected` or the
    /// status machine forbids the move.
    async fn update_status(
        &self,
        key: &BlobKey,
        expected: BlobStatus,
        update: StatusUpdate,
    ) -> Result<bool, StoreError>;

    /// Bump the retry counter and return the new value.
    async fn increment_retry(&self, key: &BlobKey) -> Result<u32, StoreError>;

    async fn get(&self, key: &BlobKey) -> Result<Blob, StoreError>;
}
