//! # Restart Recovery
//!
//! A batcher process dies mid-pipeline and a new one starts over the same
//! store. Progress recorded in the store is resumed, never repeated.

use std::time::Duration;

use da_batcher::{BatcherMetrics, BlobStatus};

use super::harness::{config, Harness};

#[tokio::test(start_paused = true)]
async fn test_restart_during_confirmation_confirms_once() {
    let h = Harness::new();
    let key = h.submit(b"payload").await;

    // The first process submits but never sees a receipt before it dies
    h.chain.withhold_receipts(true);
    {
        let first = h.batcher(config()).unwrap();
        let report = first.run_cycle().await.unwrap();
        assert_eq!(report.confirmations_started, 1);
        first.drain_confirmations(Duration::from_secs(1)).await;
        assert_eq!(first.confirming(), 0);
    }
    assert_eq!(h.status(&key).await, BlobStatus::Dispatched);
    assert_eq!(h.chain.submission_count(), 1);

    h.chain.withhold_receipts(false);
    let metrics = BatcherMetrics::new();
    let second = h.batcher_with_metrics(config(), metrics.clone()).unwrap();
    let report = second.run_cycle().await.unwrap();
    assert_eq!(report.cut, 0);
    assert_eq!(report.dispatched, 0);
    assert_eq!(report.confirmations_started, 1);
    second.await_confirmations().await;

    assert_eq!(h.status(&key).await, BlobStatus::Confirmed);
    assert_eq!(metrics.transitions(BlobStatus::Confirmed), 1);
    assert_eq!(
        h.store.transitions_of(&key),
        vec![
            (BlobStatus::Queued, BlobStatus::Encoded),
            (BlobStatus::Encoded, BlobStatus::Dispatched),
            (BlobStatus::Dispatched, BlobStatus::Confirmed),
        ]
    );

    // Nothing left for further cycles
    let report = second.run_cycle().await.unwrap();
    assert_eq!(report.confirmations_started, 0);
    assert!(report.is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_dispatch_failure_keeps_retry_count() {
    let h = Harness::new();
    for id in h.state.operators.keys() {
        h.nodes.fail(*id);
    }
    let key = h.submit(b"payload").await;
    {
        let first = h.batcher(config()).unwrap();
        first.run_cycle().await.unwrap();
    }
    let stored = h.blob(&key).await;
    assert_eq!(stored.status(), BlobStatus::Encoded);
    assert_eq!(stored.metadata.num_retries, 1);

    // The retry already spent is not forgotten by the new process
    let second = h.batcher(config()).unwrap();
    second.run_cycle().await.unwrap();
    let report = second.run_cycle().await.unwrap();
    assert_eq!(report.failed, 1);
    let stored = h.blob(&key).await;
    assert_eq!(stored.status(), BlobStatus::Failed);
    assert_eq!(stored.metadata.num_retries, 2);
    assert_eq!(h.chain.submission_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_confirmed_blob_survives_restart_into_finalization() {
    let h = Harness::new();
    let key = h.submit(b"payload").await;
    {
        let first = h.batcher(config()).unwrap();
        first.run_cycle().await.unwrap();
        first.await_confirmations().await;
    }
    assert_eq!(h.status(&key).await, BlobStatus::Confirmed);

    h.chain.advance(10);
    let second = h.batcher(config()).unwrap();
    let report = second.finalizer().finalize_once().await.unwrap();
    assert_eq!(report.finalized(), 1);
    assert_eq!(h.status(&key).await, BlobStatus::Finalized);
    assert_eq!(h.chain.submission_count(), 1);
}
