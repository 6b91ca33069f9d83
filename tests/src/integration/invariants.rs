//! # Pipeline Invariants
//!
//! Checked over whole runs rather than single steps: statuses only move
//! forward and no blob is retried past the configured ceiling.

use std::collections::HashMap;
use std::time::Duration;

use proptest::prelude::*;

use da_batcher::{BatcherConfig, BlobKey, BlobStatus, FailureReason, OperatorId};

use super::harness::{config, Harness, Transition};

/// Every key's accepted transitions form one forward path from `Queued`.
fn assert_monotone(transitions: &[Transition]) {
    let mut current: HashMap<BlobKey, BlobStatus> = HashMap::new();
    for t in transitions {
        let status = current.entry(t.key).or_insert(BlobStatus::Queued);
        assert_eq!(*status, t.from, "transition out of a status the blob was not in");
        assert!(
            t.from.can_transition_to(t.to),
            "forbidden transition {} -> {}",
            t.from,
            t.to
        );
        *status = t.to;
    }
}

#[tokio::test(start_paused = true)]
async fn test_mixed_failures_keep_statuses_monotone() {
    let h = Harness::new();
    let max_retries = config().max_num_retries_per_blob;
    let batcher = h.batcher(config()).unwrap();

    let healthy = h.submit(b"healthy").await;
    let flaky = h.submit(b"flaky").await;
    let broken = h.submit(b"broken").await;
    h.encoder.fail_payload_times(b"flaky", 1);
    h.encoder.fail_payload(b"broken");
    // One of four operators is down for the whole run; 75% still clears 67%
    h.nodes.fail(OperatorId([1; 32]));
    h.chain.fail_submissions(1);

    let (tx, rx) = tokio::sync::watch::channel(false);
    let chain = h.chain.clone();
    let drive = async {
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            chain.advance(1);
        }
        tx.send(true).unwrap();
    };
    let (result, _) = tokio::join!(batcher.run(rx), drive);
    result.unwrap();

    assert_monotone(&h.store.transitions());

    assert_eq!(h.status(&healthy).await, BlobStatus::Finalized);
    assert_eq!(h.status(&flaky).await, BlobStatus::Finalized);
    let broken = h.blob(&broken).await;
    assert_eq!(broken.status(), BlobStatus::Failed);
    assert_eq!(broken.metadata.failure, Some(FailureReason::EncodingFailed));

    for key in [healthy, flaky] {
        assert!(h.blob(&key).await.metadata.num_retries <= max_retries);
    }
    assert_eq!(broken.metadata.num_retries, max_retries);
}

#[tokio::test(start_paused = true)]
async fn test_statuses_never_regress_across_concurrent_finalization() {
    let h = Harness::new();
    let batcher = h.batcher(config()).unwrap();
    let keys = [
        h.submit(b"one").await,
        h.submit(b"two").await,
        h.submit(b"three").await,
    ];
    batcher.run_cycle().await.unwrap();
    batcher.await_confirmations().await;
    h.chain.advance(10);

    // Two finalizer passes race over the same confirmed blobs
    let finalizer = batcher.finalizer();
    let (a, b) = tokio::join!(finalizer.finalize_once(), finalizer.finalize_once());
    assert_eq!(a.unwrap().finalized() + b.unwrap().finalized(), 3);

    assert_monotone(&h.store.transitions());
    for key in &keys {
        assert_eq!(h.status(key).await, BlobStatus::Finalized);
    }
}

fn run_encoding_failures(max_retries: u32, failures: u32) -> (BlobStatus, u32, Option<FailureReason>) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap();
    runtime.block_on(async {
        let h = Harness::new();
        let batcher = h
            .batcher(BatcherConfig {
                max_num_retries_per_blob: max_retries,
                ..config()
            })
            .unwrap();
        let key = h.submit(b"payload").await;
        if failures > 0 {
            h.encoder.fail_payload_times(b"payload", failures);
        }

        for _ in 0..(max_retries + failures + 2) {
            batcher.run_cycle().await.unwrap();
            batcher.await_confirmations().await;
        }

        assert_monotone(&h.store.transitions());
        let blob = h.blob(&key).await;
        (blob.status(), blob.metadata.num_retries, blob.metadata.failure)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_retries_never_exceed_ceiling(max_retries in 0u32..4, failures in 0u32..6) {
        let (status, retries, failure) = run_encoding_failures(max_retries, failures);

        prop_assert!(retries <= max_retries);
        if failures <= max_retries {
            prop_assert_eq!(status, BlobStatus::Confirmed);
            prop_assert_eq!(retries, failures);
            prop_assert_eq!(failure, None);
        } else {
            prop_assert_eq!(status, BlobStatus::Failed);
            prop_assert_eq!(retries, max_retries);
            prop_assert_eq!(failure, Some(FailureReason::EncodingFailed));
        }
    }
}
