//! Pipeline services: encoding pool, dispatcher, confirmer, finalizer and
//! the batcher that drives them.

pub mod batcher;
pub mod confirmer;
pub mod dispatcher;
pub mod encoding;
pub mod finalizer;

pub use batcher::{Batcher, BatcherDeps};
pub use confirmer::Confirmer;
pub use dispatcher::{Dispatcher, EncodedBlobRef};
pub use encoding::{EncodeJob, EncodedBlobCache, EncodingStage};
pub use finalizer::Finalizer;

use shared_types::{BlobMetadata, BlobStatus, StatusUpdate, StoreError};
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use crate::domain::RetryPolicy;
use crate::error::{BatcherError, Result, Stage};
use crate::metrics::BatcherMetrics;
use crate::ports::BlobStore;

/// Bound `fut` by `after`, reporting a stage-labelled timeout.
pub async fn with_timeout<T, F>(stage: Stage, after: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| BatcherError::Timeout { stage, after })?
}

/// What happened to a blob after a stage failed for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlobFate {
    /// Counter bumped, blob stays where it is for the next attempt
    Retrying { retries: u32 },
    /// Moved to `Failed`
    Failed,
    /// Another writer moved the blob first
    Conflict,
}

/// Either spend one retry on the blob or fail it for good.
///
/// Non-retryable errors and exhausted blobs fail immediately.
pub async fn record_stage_failure(
    store: &dyn BlobStore,
    policy: &RetryPolicy,
    metrics: &BatcherMetrics,
    meta: &BlobMetadata,
    current: BlobStatus,
    stage: Stage,
    err: &BatcherError,
) -> std::result::Result<BlobFate, StoreError> {
    if err.is_retryable() && !policy.is_exhausted(meta.num_retries) {
        let retries = store.increment_retry(&meta.key).await?;
        metrics.record_retry(stage);
        warn!(
            key = %meta.key.short(),
            retries,
            max = policy.max_retries,
            error = %err,
            "[{}] Blob will be retried",
            stage
        );
        return Ok(BlobFate::Retrying { retries });
    }

    let reason = stage.failure_reason();
    if store
        .update_status(&meta.key, current, StatusUpdate::failed(reason))
        .await?
    {
        metrics.record_failure(reason);
        error!(
            key = %meta.key.short(),
            retries = meta.num_retries,
            reason = %reason,
            error = %err,
            "[{}] Blob failed permanently",
            stage
        );
        Ok(BlobFate::Failed)
    } else {
        Ok(BlobFate::Conflict)
    }
}
