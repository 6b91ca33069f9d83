//! In-memory blob store.
//!
//! Used by tests and by single-process deployments that accept losing
//! queued blobs on restart.

use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::{
    Blob, BlobKey, BlobMetadata, BlobStatus, BlobSubmission, StatusUpdate, StoreError,
};
use std::collections::HashMap;

use super::unix_millis;
use crate::ports::BlobStore;

/// `HashMap`-backed blob store. The write lock makes every CAS atomic.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<BlobKey, Blob>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn enqueue(&self, submission: BlobSubmission) -> Result<BlobKey, StoreError> {
        submission.validate()?;
        let key = submission.key();

        let mut blobs = self.blobs.write();
        if blobs.contains_key(&key) {
            return Ok(key);
        }
        let metadata = BlobMetadata::new(key, &submission, unix_millis());
        blobs.insert(
            key,
            Blob {
                data: submission.data,
                metadata,
            },
        );
        Ok(key)
    }

    async fn get_by_status(
        &self,
        status: BlobStatus,
        limit: usize,
    ) -> Result<Vec<Blob>, StoreError> {
        let blobs = self.blobs.read();
        let mut matching: Vec<&Blob> = blobs
            .values()
            .filter(|b| b.metadata.status == status)
            .collect();
        matching.sort_by_key(|b| (b.metadata.submitted_at_ms, b.metadata.key));
        Ok(matching.into_iter().take(limit).cloned().collect())
    }

    async fn update_status(
        &self,
        key: &BlobKey,
        expected: BlobStatus,
        update: StatusUpdate,
    ) -> Result<bool, StoreError> {
        let mut blobs = self.blobs.write();
        let blob = blobs.get_mut(key).ok_or(StoreError::NotFound(*key))?;
        Ok(blob.metadata.apply(expected, &update))
    }

    async fn increment_retry(&self, key: &BlobKey) -> Result<u32, StoreError> {
        let mut blobs = self.blobs.write();
        let blob = blobs.get_mut(key).ok_or(StoreError::NotFound(*key))?;
        blob.metadata.num_retries = blob.metadata.num_retries.saturating_add(1);
        Ok(blob.metadata.num_retries)
    }

    async fn get(&self, key: &BlobKey) -> Result<Blob, StoreError> {
        self.blobs
            .read()
            .get(key)
            .cloned()
            .ok_or(StoreError::NotFound(*key))
    }
}
