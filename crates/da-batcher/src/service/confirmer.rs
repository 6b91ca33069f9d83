//! On-chain batch confirmation.
//!
//! Retries are charged to every blob of the batch: each failed attempt
//! bumps all their counters, and the batch is abandoned (every blob
//! `Failed`) as soon as one of them has no retries left.

use shared_crypto::merkle_root;
use shared_types::{
    BlobKey, BlobStatus, ConfirmationInfo, Hash, OperatorId, StatusUpdate,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::with_timeout;
use crate::config::TimeoutConfig;
use crate::domain::{
    BatchHeader, ConfirmationRecord, ConfirmationStatus, DispatchedBlob, RetryPolicy,
};
use crate::error::{BatcherError, Result, Stage};
use crate::metrics::BatcherMetrics;
use crate::ports::{BlobStore, ChainClient, ConfirmBatchCall, SentTx, TxReceipt};

/// A submitted transaction still waiting for its receipt.
#[derive(Clone, Copy)]
struct Submitted {
    sent: SentTx,
    submission_block: u64,
}

/// Submits confirmation transactions and records their outcome on the blobs.
pub struct Confirmer {
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn BlobStore>,
    policy: RetryPolicy,
    metrics: BatcherMetrics,
    timeouts: TimeoutConfig,
    poll_interval: Duration,
    /// One submission at a time per signing account
    submit_lock: Mutex<()>,
}

impl Confirmer {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn BlobStore>,
        policy: RetryPolicy,
        metrics: BatcherMetrics,
        timeouts: TimeoutConfig,
        poll_interval: Duration,
    ) -> Self {
        Self {
            chain,
            store,
            policy,
            metrics,
            timeouts,
            poll_interval,
            submit_lock: Mutex::new(()),
        }
    }

    /// Confirm `blobs` under `header` and move them to `Confirmed`.
    ///
    /// Every blob must be `Dispatched` when called and `header` must commit
    /// to exactly these blobs in this order.
    pub async fn confirm(
        &self,
        header: &BatchHeader,
        blobs: &[DispatchedBlob],
    ) -> Result<ConfirmationRecord> {
        let _timer = self.metrics.stage_timer(Stage::Confirm);
        let batch_hash = header.hash();
        let batch = hex::encode(&batch_hash[..6]);
        self.check_preconditions(header, blobs).await?;

        let call = ConfirmBatchCall {
            header: header.clone(),
            blob_header_hashes: blobs.iter().map(|b| b.blob_header_hash).collect(),
            attestations: blobs.iter().map(|b| b.attestations.clone()).collect(),
        };
        let keys: Vec<BlobKey> = blobs.iter().map(|b| b.key).collect();

        // Every broadcast for this batch shares one nonce
        let mut pending: Vec<Submitted> = Vec::new();
        let mut attempts = 0u32;
        let (submitted, receipt) = loop {
            attempts += 1;
            let err = match self.attempt(&call, &mut pending).await {
                Ok(done) => break done,
                Err(err) => err,
            };

            if !err.is_retryable() || self.any_exhausted(&keys).await? {
                return Err(self.abandon(&batch, &keys, attempts, err).await);
            }
            for key in &keys {
                self.store.increment_retry(key).await?;
                self.metrics.record_retry(Stage::Confirm);
            }
            let delay = self.policy.backoff(attempts - 1);
            warn!(
                batch = %batch,
                attempt = attempts,
                blobs = keys.len(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "[confirmer] Confirmation failed, retrying"
            );
            tokio::time::sleep(delay).await;
        };

        let mut conflicts = Vec::new();
        for (index, key) in keys.iter().enumerate() {
            let info = ConfirmationInfo {
                batch_header_hash: batch_hash,
                blob_index: index as u32,
                tx_hash: submitted.sent.tx_hash,
                submission_block: submitted.submission_block,
                confirmation_block: receipt.block_number,
            };
            if self
                .store
                .update_status(key, BlobStatus::Dispatched, StatusUpdate::confirmed(info))
                .await?
            {
                self.metrics.record_transition(BlobStatus::Confirmed);
            } else {
                warn!(key = %key.short(), batch = %batch, "[confirmer] Blob moved before it could be confirmed");
                conflicts.push(*key);
            }
        }

        let signers: BTreeSet<OperatorId> = blobs
            .iter()
            .flat_map(|b| b.attestations.iter().map(|a| a.operator))
            .collect();
        info!(
            batch = %batch,
            tx = %hex::encode(submitted.sent.tx_hash),
            block = receipt.block_number,
            blobs = keys.len(),
            attempts,
            "[confirmer] Batch confirmed"
        );

        Ok(ConfirmationRecord {
            batch_header_hash: batch_hash,
            tx_hash: submitted.sent.tx_hash,
            submission_block: submitted.submission_block,
            confirmation_block: receipt.block_number,
            blob_keys: keys,
            signers,
            attempts,
            status: if conflicts.is_empty() {
                ConfirmationStatus::Confirmed
            } else {
                ConfirmationStatus::PartiallyRecorded { conflicts }
            },
        })
    }

    async fn check_preconditions(&self, header: &BatchHeader, blobs: &[DispatchedBlob]) -> Result<()> {
        if blobs.is_empty() {
            return Err(BatcherError::Precondition("empty batch".into()));
        }
        let hashes: Vec<Hash> = blobs.iter().map(|b| b.blob_header_hash).collect();
        if merkle_root(&hashes) != header.blob_headers_root {
            return Err(BatcherError::Precondition(
                "batch header does not commit to these blobs".into(),
            ));
        }
        for blob in blobs {
            let status = self.store.get(&blob.key).await?.status();
            if status != BlobStatus::Dispatched {
                return Err(BatcherError::Precondition(format!(
                    "blob {} is {status}, expected dispatched",
                    blob.key.short()
                )));
            }
        }
        Ok(())
    }

    /// One confirmation attempt. Transactions left pending by earlier
    /// attempts are looked up first; if none was mined the latest one is
    /// replaced at its nonce rather than sent again under a new one.
    async fn attempt(
        &self,
        call: &ConfirmBatchCall,
        pending: &mut Vec<Submitted>,
    ) -> Result<(Submitted, TxReceipt)> {
        if let Ok(Some((previous, receipt))) = self.mined(pending).await {
            debug!(tx = %hex::encode(previous.sent.tx_hash), "[confirmer] Earlier submission was mined");
            return check_receipt(receipt).map(|r| (previous, r));
        }

        let replacing = pending.last().map(|p| p.sent);
        let submitted = self.submit(call, replacing.as_ref()).await?;
        pending.push(submitted);
        let (submitted, receipt) = self.await_receipt(pending).await?;
        check_receipt(receipt).map(|r| (submitted, r))
    }

    async fn submit(&self, call: &ConfirmBatchCall, replacing: Option<&SentTx>) -> Result<Submitted> {
        let _guard = self.submit_lock.lock().await;
        let submission_block = with_timeout(
            Stage::Confirm,
            self.timeouts.chain_read(),
            self.chain.block_number(),
        )
        .await?;
        let sent = with_timeout(
            Stage::Confirm,
            self.timeouts.chain_write(),
            self.chain.submit_confirmation(call, replacing),
        )
        .await?;
        debug!(
            tx = %hex::encode(sent.tx_hash),
            nonce = sent.nonce,
            replacement = replacing.is_some(),
            submission_block,
            "[confirmer] Confirmation submitted"
        );
        Ok(Submitted {
            sent,
            submission_block,
        })
    }

    /// First receipt found among the batch's transactions, newest first.
    /// Transient lookup errors count as not mined yet.
    async fn mined(&self, pending: &[Submitted]) -> Result<Option<(Submitted, TxReceipt)>> {
        for submitted in pending.iter().rev() {
            match with_timeout(
                Stage::Confirm,
                self.timeouts.chain_read(),
                self.chain.transaction_receipt(&submitted.sent.tx_hash),
            )
            .await
            {
                Ok(Some(receipt)) => return Ok(Some((*submitted, receipt))),
                Ok(None) => {}
                Err(e) if e.is_retryable() => {
                    debug!(error = %e, "[confirmer] Receipt poll failed");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Poll until one of the receipts shows up or the confirmation
    /// deadline passes.
    async fn await_receipt(&self, pending: &[Submitted]) -> Result<(Submitted, TxReceipt)> {
        let deadline = Instant::now() + self.timeouts.confirmation();
        loop {
            if let Some(found) = self.mined(pending).await? {
                return Ok(found);
            }
            if Instant::now() + self.poll_interval > deadline {
                return Err(BatcherError::Timeout {
                    stage: Stage::Confirm,
                    after: self.timeouts.confirmation(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Whether any blob of the batch has used up its retries.
    async fn any_exhausted(&self, keys: &[BlobKey]) -> Result<bool> {
        for key in keys {
            let meta = self.store.get(key).await?.metadata;
            if self.policy.is_exhausted(meta.num_retries) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn abandon(&self, batch: &str, keys: &[BlobKey], attempts: u32, err: BatcherError) -> BatcherError {
        let reason = Stage::Confirm.failure_reason();
        let mut failed = 0usize;
        for key in keys {
            match self
                .store
                .update_status(key, BlobStatus::Dispatched, StatusUpdate::failed(reason))
                .await
            {
                Ok(true) => {
                    failed += 1;
                    self.metrics.record_failure(reason);
                }
                Ok(false) => {}
                Err(e) => error!(key = %key.short(), error = %e, "[confirmer] Could not mark blob failed"),
            }
        }
        error!(
            batch = %batch,
            attempts,
            blobs = keys.len(),
            failed,
            error = %err,
            "[confirmer] ALERT: batch abandoned, blobs marked failed"
        );
        BatcherError::BatchAbandoned {
            batch: batch.to_string(),
            attempts,
            last_error: err.to_string(),
        }
    }
}

fn check_receipt(receipt: TxReceipt) -> Result<TxReceipt> {
    if receipt.success {
        Ok(receipt)
    } else {
        Err(BatcherError::TransactionFailed {
            tx_hash: hex::encode(receipt.tx_hash),
        })
    }
}
