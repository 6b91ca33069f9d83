//! Background promotion of confirmed blobs to `Finalized`.
//!
//! Keeps no progress in memory: each pass starts from the blobs the store
//! reports as `Confirmed`, so the loop resumes cleanly after a restart.

use shared_types::{Blob, BlobStatus, StatusUpdate, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{record_stage_failure, with_timeout, BlobFate};
use crate::domain::{FinalizationRecord, FinalizationReport, RetryPolicy};
use crate::error::{BatcherError, Result, Stage};
use crate::metrics::BatcherMetrics;
use crate::ports::{BlobStore, ChainClient, TxHash};

/// What a receipt lookup said about a confirmation transaction.
#[derive(Clone, Debug)]
enum ReceiptCheck {
    Mined(u64),
    Missing,
    Reverted,
    Unavailable(String),
}

impl ReceiptCheck {
    fn into_error(self, tx_hash: &TxHash) -> Option<BatcherError> {
        let tx = hex::encode(tx_hash);
        match self {
            ReceiptCheck::Mined(_) => None,
            ReceiptCheck::Missing => Some(BatcherError::Chain(format!(
                "confirmation transaction {tx} no longer on chain"
            ))),
            ReceiptCheck::Reverted => Some(BatcherError::TransactionFailed { tx_hash: tx }),
            ReceiptCheck::Unavailable(reason) => Some(BatcherError::Chain(reason)),
        }
    }
}

pub struct Finalizer {
    store: Arc<dyn BlobStore>,
    chain: Arc<dyn ChainClient>,
    policy: RetryPolicy,
    metrics: BatcherMetrics,
    /// Blocks a confirmation must be buried under
    finalization_interval: u64,
    interval: Duration,
    batch_limit: usize,
    chain_read_timeout: Duration,
}

impl Finalizer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn BlobStore>,
        chain: Arc<dyn ChainClient>,
        policy: RetryPolicy,
        metrics: BatcherMetrics,
        finalization_interval: u64,
        interval: Duration,
        batch_limit: usize,
        chain_read_timeout: Duration,
    ) -> Self {
        Self {
            store,
            chain,
            policy,
            metrics,
            finalization_interval,
            interval,
            batch_limit,
            chain_read_timeout,
        }
    }

    /// One pass over the confirmed blobs.
    ///
    /// Only store failures abort the pass; chain failures are charged to
    /// the affected blobs.
    pub async fn finalize_once(&self) -> std::result::Result<FinalizationReport, StoreError> {
        let _timer = self.metrics.stage_timer(Stage::Finalize);
        let confirmed = self
            .store
            .get_by_status(BlobStatus::Confirmed, self.batch_limit)
            .await?;
        let mut report = FinalizationReport::default();
        if confirmed.is_empty() {
            return Ok(report);
        }

        let head = self
            .policy
            .retry("[finalizer] chain head read", || {
                with_timeout(
                    Stage::Finalize,
                    self.chain_read_timeout,
                    self.chain.block_number(),
                )
            })
            .await;
        let head = match head {
            Ok(head) => head,
            Err(err) => {
                warn!(blobs = confirmed.len(), error = %err, "[finalizer] Chain head unavailable");
                for blob in &confirmed {
                    self.charge(&mut report, blob, &err).await?;
                }
                return Ok(report);
            }
        };
        self.metrics.set_chain_head(head);
        report.chain_head = Some(head);

        let mut receipts: HashMap<TxHash, ReceiptCheck> = HashMap::new();
        for blob in &confirmed {
            let Some(mut info) = blob.metadata.confirmation.clone() else {
                warn!(key = %blob.key().short(), "[finalizer] Confirmed blob has no confirmation record");
                continue;
            };

            let check = match receipts.get(&info.tx_hash) {
                Some(check) => check.clone(),
                None => {
                    let check = self.check_receipt(&info.tx_hash).await;
                    receipts.insert(info.tx_hash, check.clone());
                    check
                }
            };
            let block = match check {
                ReceiptCheck::Mined(block) => block,
                other => {
                    if let Some(err) = other.into_error(&info.tx_hash) {
                        self.charge(&mut report, blob, &err).await?;
                    }
                    continue;
                }
            };

            if block != info.confirmation_block {
                info!(
                    key = %blob.key().short(),
                    from = info.confirmation_block,
                    to = block,
                    "[finalizer] Confirmation moved to another block"
                );
                info.confirmation_block = block;
            }

            let mut record = FinalizationRecord {
                batch_header_hash: info.batch_header_hash,
                blob_key: blob.key(),
                confirmation_block: block,
                chain_head: head,
                finalized: false,
            };
            if head.saturating_sub(block) >= self.finalization_interval {
                let update = StatusUpdate {
                    confirmation: Some(info),
                    ..StatusUpdate::to(BlobStatus::Finalized)
                };
                if self
                    .store
                    .update_status(&blob.key(), BlobStatus::Confirmed, update)
                    .await?
                {
                    self.metrics.record_transition(BlobStatus::Finalized);
                    record.finalized = true;
                    debug!(key = %blob.key().short(), block, head, "[finalizer] Blob finalized");
                } else {
                    debug!(key = %blob.key().short(), "[finalizer] Blob already moved on");
                    continue;
                }
            }
            report.records.push(record);
        }

        Ok(report)
    }

    async fn check_receipt(&self, tx_hash: &TxHash) -> ReceiptCheck {
        let lookup = self
            .policy
            .retry("[finalizer] receipt read", || {
                with_timeout(
                    Stage::Finalize,
                    self.chain_read_timeout,
                    self.chain.transaction_receipt(tx_hash),
                )
            })
            .await;
        match lookup {
            Ok(Some(receipt)) if receipt.success => ReceiptCheck::Mined(receipt.block_number),
            Ok(Some(_)) => ReceiptCheck::Reverted,
            Ok(None) => ReceiptCheck::Missing,
            Err(e) => ReceiptCheck::Unavailable(e.to_string()),
        }
    }

    async fn charge(
        &self,
        report: &mut FinalizationReport,
        blob: &Blob,
        err: &BatcherError,
    ) -> std::result::Result<(), StoreError> {
        match record_stage_failure(
            self.store.as_ref(),
            &self.policy,
            &self.metrics,
            &blob.metadata,
            BlobStatus::Confirmed,
            Stage::Finalize,
            err,
        )
        .await?
        {
            BlobFate::Retrying { .. } => report.retried += 1,
            BlobFate::Failed => report.failed += 1,
            BlobFate::Conflict => {}
        }
        Ok(())
    }

    /// Run passes every `interval` until `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            interval_secs = self.interval.as_secs(),
            depth = self.finalization_interval,
            "[finalizer] Started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.finalize_once().await {
                        Ok(report) if report.finalized() > 0 || report.failed > 0 => info!(
                            head = ?report.chain_head,
                            finalized = report.finalized(),
                            pending = report.pending(),
                            retried = report.retried,
                            failed = report.failed,
                            "[finalizer] Pass complete"
                        ),
                        Ok(report) => debug!(
                            head = ?report.chain_head,
                            pending = report.pending(),
                            retried = report.retried,
                            "[finalizer] Pass complete"
                        ),
                        Err(e) => warn!(error = %e, "[finalizer] Pass skipped, store unavailable"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("[finalizer] Stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryBlobStore;
    use crate::domain::BatchHeader;
    use crate::ports::ConfirmBatchCall;
    use crate::test_utils::{default_params, seed_dispatched, MockChain};
    use shared_types::{BlobKey, ConfirmationInfo, FailureReason};

    const DEPTH: u64 = 64;

    struct Harness {
        store: Arc<InMemoryBlobStore>,
        chain: Arc<MockChain>,
        metrics: BatcherMetrics,
        finalizer: Arc<Finalizer>,
    }

    fn harness(max_retries: u32) -> Harness {
        let store = Arc::new(InMemoryBlobStore::new());
        let chain = Arc::new(MockChain::new(1_000));
        let metrics = BatcherMetrics::new();
        let finalizer = Arc::new(Finalizer::new(
            store.clone(),
            chain.clone(),
            RetryPolicy::new(max_retries, Duration::from_millis(10), Duration::from_millis(50)),
            metrics.clone(),
            DEPTH,
            Duration::from_secs(1),
            100,
            Duration::from_millis(500),
        ));
        Harness {
            store,
            chain,
            metrics,
            finalizer,
        }
    }

    /// A blob confirmed by a transaction mined at the current head.
    async fn confirmed(h: &Harness, payload: &[u8]) -> (BlobKey, TxHash) {
        let blob = seed_dispatched(h.store.as_ref(), payload, 900).await;
        let header = BatchHeader::build(900, &[blob.blob_header_hash], &default_params());
        let call = ConfirmBatchCall {
            header: header.clone(),
            blob_header_hashes: vec![blob.blob_header_hash],
            attestations: vec![blob.attestations.clone()],
        };
        let tx_hash = h.chain.submit_confirmation(&call, None).await.unwrap().tx_hash;
        let info = ConfirmationInfo {
            batch_header_hash: header.hash(),
            blob_index: 0,
            tx_hash,
            submission_block: h.chain.head(),
            confirmation_block: h.chain.head(),
        };
        assert!(h
            .store
            .update_status(&blob.key, BlobStatus::Dispatched, StatusUpdate::confirmed(info))
            .await
            .unwrap());
        (blob.key, tx_hash)
    }

    #[tokio::test]
    async fn test_idle_pass_reads_nothing() {
        let h = harness(2);
        let report = h.finalizer.finalize_once().await.unwrap();
        assert_eq!(report, FinalizationReport::default());
    }

    #[tokio::test]
    async fn test_finalizes_exactly_once_after_depth() {
        let h = harness(2);
        let (key, _) = confirmed(&h, b"blob").await;

        h.chain.advance(DEPTH - 1);
        let report = h.finalizer.finalize_once().await.unwrap();
        assert_eq!(report.finalized(), 0);
        assert_eq!(report.pending(), 1);
        assert_eq!(h.store.get(&key).await.unwrap().status(), BlobStatus::Confirmed);

        h.chain.advance(1);
        let report = h.finalizer.finalize_once().await.unwrap();
        assert_eq!(report.finalized(), 1);
        assert_eq!(report.records[0].chain_head - report.records[0].confirmation_block, DEPTH);

        h.chain.advance(100);
        for _ in 0..3 {
            let report = h.finalizer.finalize_once().await.unwrap();
            assert_eq!(report.finalized(), 0);
        }
        assert_eq!(h.store.get(&key).await.unwrap().status(), BlobStatus::Finalized);
        assert_eq!(h.metrics.transitions(BlobStatus::Finalized), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_head_fails_with_distinct_reason() {
        let h = harness(1);
        let (key, _) = confirmed(&h, b"blob").await;
        h.chain.set_head_unavailable(true);

        let report = h.finalizer.finalize_once().await.unwrap();
        assert_eq!(report.retried, 1);
        assert_eq!(report.chain_head, None);
        assert_eq!(h.store.get(&key).await.unwrap().metadata.num_retries, 1);

        let report = h.finalizer.finalize_once().await.unwrap();
        assert_eq!(report.failed, 1);
        let stored = h.store.get(&key).await.unwrap();
        assert_eq!(stored.status(), BlobStatus::Failed);
        assert_eq!(stored.metadata.failure, Some(FailureReason::FinalizationFailed));
        assert_eq!(stored.metadata.num_retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_receipt_is_retried() {
        let h = harness(2);
        let (key, tx_hash) = confirmed(&h, b"blob").await;
        h.chain.drop_receipt(&tx_hash);
        h.chain.advance(DEPTH * 2);

        let report = h.finalizer.finalize_once().await.unwrap();
        assert_eq!(report.retried, 1);
        assert_eq!(report.finalized(), 0);
        assert_eq!(h.store.get(&key).await.unwrap().status(), BlobStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_moved_receipt_delays_finalization() {
        let h = harness(2);
        let (key, tx_hash) = confirmed(&h, b"blob").await;
        let start = h.chain.head();
        h.chain.move_receipt(&tx_hash, start + 10);
        h.chain.advance(DEPTH);

        let report = h.finalizer.finalize_once().await.unwrap();
        assert_eq!(report.finalized(), 0);
        assert_eq!(report.records[0].confirmation_block, start + 10);

        h.chain.advance(10);
        let report = h.finalizer.finalize_once().await.unwrap();
        assert_eq!(report.finalized(), 1);
        let stored = h.store.get(&key).await.unwrap();
        assert_eq!(
            stored.metadata.confirmation.unwrap().confirmation_block,
            start + 10
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let h = harness(2);
        let (key, _) = confirmed(&h, b"blob").await;
        h.chain.advance(DEPTH);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(h.finalizer.clone().run(rx));
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(h.store.get(&key).await.unwrap().status(), BlobStatus::Finalized);
    }
}
