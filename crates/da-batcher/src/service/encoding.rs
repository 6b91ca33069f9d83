//! Bounded encoding pool and the cache of encoded blobs awaiting dispatch.

use parking_lot::Mutex;
use shared_types::BlobKey;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use super::with_timeout;
use crate::domain::{EncodedBlob, EncodingParams};
use crate::error::{BatcherError, Result, Stage};
use crate::ports::EncoderClient;

/// One blob to encode.
#[derive(Clone, Debug)]
pub struct EncodeJob {
    pub key: BlobKey,
    pub data: Vec<u8>,
    pub params: Vec<EncodingParams>,
}

/// Runs encoder calls with at most `workers` in flight.
pub struct EncodingStage {
    encoder: Arc<dyn EncoderClient>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl EncodingStage {
    pub fn new(encoder: Arc<dyn EncoderClient>, workers: usize, timeout: Duration) -> Self {
        Self {
            encoder,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            timeout,
        }
    }

    /// Encode every job; results come back in job order.
    ///
    /// Each call is bounded by the encoding timeout. A failed job never
    /// affects the others.
    pub async fn encode_all(&self, jobs: Vec<EncodeJob>) -> Vec<(BlobKey, Result<EncodedBlob>)> {
        let keys: Vec<BlobKey> = jobs.iter().map(|job| job.key).collect();
        let mut tasks = JoinSet::new();

        for (index, job) in jobs.into_iter().enumerate() {
            let encoder = Arc::clone(&self.encoder);
            let permits = Arc::clone(&self.permits);
            let timeout = self.timeout;
            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        with_timeout(
                            Stage::Encode,
                            timeout,
                            encoder.encode(&job.data, &job.params, timeout),
                        )
                        .await
                    }
                    Err(e) => Err(BatcherError::Encoder(format!("worker pool closed: {e}"))),
                };
                (index, result)
            });
        }

        let mut results: Vec<Option<Result<EncodedBlob>>> = keys.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => error!(error = %e, "[encoder] Encoding task aborted"),
            }
        }

        keys.into_iter()
            .zip(results)
            .map(|(key, result)| {
                let result = result.unwrap_or_else(|| {
                    Err(BatcherError::Encoder("encoding task aborted".into()))
                });
                if let Err(e) = &result {
                    debug!(key = %key.short(), error = %e, "[encoder] Encoding failed");
                }
                (key, result)
            })
            .collect()
    }
}

/// Encoded chunks held between the encode and dispatch phases.
///
/// Lost on restart; blobs found `Encoded` without a cache entry are
/// re-encoded before dispatch.
#[derive(Default)]
pub struct EncodedBlobCache {
    entries: Mutex<HashMap<BlobKey, EncodedBlob>>,
}

impl EncodedBlobCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: BlobKey, encoded: EncodedBlob) {
        self.entries.lock().insert(key, encoded);
    }

    pub fn get(&self, key: &BlobKey) -> Option<EncodedBlob> {
        self.entries.lock().get(key).cloned()
    }

    pub fn remove(&self, key: &BlobKey) -> Option<EncodedBlob> {
        self.entries.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
