//! # Batch Lifecycle
//!
//! Blobs driven through encode, dispatch, confirm and finalize by the
//! real services, with failures injected at the edges.

use std::time::Duration;

use da_batcher::test_utils::TEST_STAKE;
use da_batcher::{
    BatcherConfig, BatcherError, BatcherMetrics, BlobStatus, ConfigError, FailureReason,
    OperatorId, SecurityParam, TimeoutConfig,
};

use super::harness::{config, Harness};

#[tokio::test(start_paused = true)]
async fn test_slow_quorum_only_delays_its_own_blob() {
    // Quorum 0: operators 1 and 2. Quorum 1: operators 3 and 4.
    let h = Harness::with_operators(&[(0, 2), (1, 2)]);
    h.nodes.hang(OperatorId([3; 32]));
    h.nodes.hang(OperatorId([4; 32]));
    let batcher = h
        .batcher(BatcherConfig {
            timeouts: TimeoutConfig {
                attestation_timeout_ms: 500,
                ..TimeoutConfig::default()
            },
            ..config()
        })
        .unwrap();

    let a = h.submit(b"blob-a").await;
    let b = h.submit(b"blob-b").await;
    let slow = h
        .submit_with(b"blob-slow", vec![SecurityParam::new(1, 33, 67)])
        .await;

    let report = batcher.run_cycle().await.unwrap();
    assert_eq!(report.cut, 3);
    assert_eq!(report.encoded, 3);
    assert_eq!(report.dispatched, 2);
    assert_eq!(report.retried, 1);
    assert_eq!(report.failed, 0);

    let outcomes = batcher.await_confirmations().await;
    assert_eq!(outcomes.len(), 1);
    let record = outcomes.into_iter().next().unwrap().unwrap();
    let mut confirmed = record.blob_keys.clone();
    confirmed.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(confirmed, expected);

    assert_eq!(h.status(&a).await, BlobStatus::Confirmed);
    assert_eq!(h.status(&b).await, BlobStatus::Confirmed);
    let slow_blob = h.blob(&slow).await;
    assert_eq!(slow_blob.status(), BlobStatus::Encoded);
    assert_eq!(slow_blob.metadata.num_retries, 1);
    assert_eq!(slow_blob.metadata.failure, None);

    // Quorum 1 comes back; the slow blob goes through on the next cycle
    h.nodes.heal();
    let report = batcher.run_cycle().await.unwrap();
    assert_eq!(report.dispatched, 1);
    batcher.await_confirmations().await;
    assert_eq!(h.status(&slow).await, BlobStatus::Confirmed);
    assert_eq!(h.chain.submission_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_confirmed_blob_is_finalized_exactly_once() {
    let h = Harness::new();
    let metrics = BatcherMetrics::new();
    let batcher = h.batcher_with_metrics(config(), metrics.clone()).unwrap();
    let key = h.submit(b"payload").await;

    batcher.run_cycle().await.unwrap();
    batcher.await_confirmations().await;
    let confirmation = h.blob(&key).await.metadata.confirmation.unwrap();
    assert_eq!(confirmation.confirmation_block, 100);

    let finalizer = batcher.finalizer();

    // One block short of the required depth
    h.chain.set_head(109);
    let report = finalizer.finalize_once().await.unwrap();
    assert_eq!(report.finalized(), 0);
    assert_eq!(report.pending(), 1);
    assert_eq!(h.status(&key).await, BlobStatus::Confirmed);

    h.chain.set_head(110);
    let report = finalizer.finalize_once().await.unwrap();
    assert_eq!(report.finalized(), 1);
    assert_eq!(h.status(&key).await, BlobStatus::Finalized);

    h.chain.advance(50);
    let report = finalizer.finalize_once().await.unwrap();
    assert!(report.records.is_empty());
    assert_eq!(metrics.transitions(BlobStatus::Finalized), 1);
    assert_eq!(
        h.store
            .transitions_of(&key)
            .iter()
            .filter(|(_, to)| *to == BlobStatus::Finalized)
            .count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_missing_encoder_socket_fails_before_any_call() {
    let h = Harness::new();
    h.submit(b"payload").await;

    let result = h.batcher(BatcherConfig {
        encoder_socket: String::new(),
        ..config()
    });
    assert!(matches!(
        result,
        Err(BatcherError::Config(ConfigError::MissingEncoderSocket))
    ));
    assert_eq!(h.encoder.calls(), 0);
    assert_eq!(h.nodes.requests(), 0);
    assert_eq!(h.chain.submission_count(), 0);
    assert!(h.store.transitions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reverted_confirmation_fails_the_whole_batch() {
    let h = Harness::new();
    let metrics = BatcherMetrics::new();
    let batcher = h.batcher_with_metrics(config(), metrics.clone()).unwrap();
    let a = h.submit(b"first").await;
    let b = h.submit(b"second").await;
    h.chain.revert_next();

    batcher.run_cycle().await.unwrap();
    let outcomes = batcher.await_confirmations().await;
    assert!(matches!(
        outcomes[0],
        Err(BatcherError::BatchAbandoned { .. })
    ));

    for key in [a, b] {
        let blob = h.blob(&key).await;
        assert_eq!(blob.status(), BlobStatus::Failed);
        assert_eq!(blob.metadata.failure, Some(FailureReason::ConfirmationFailed));
    }
    assert_eq!(metrics.failures(FailureReason::ConfirmationFailed), 2);
    assert_eq!(h.chain.submission_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_carries_verified_attestations() {
    let h = Harness::new();
    let batcher = h.batcher(config()).unwrap();
    let key = h.submit(b"payload").await;

    batcher.run_cycle().await.unwrap();
    batcher.await_confirmations().await;

    let blob = h.blob(&key).await;
    let dispatch = blob.metadata.dispatch.unwrap();
    assert_eq!(dispatch.reference_block_number, 100);
    assert_eq!(dispatch.attestations.len(), 4);
    assert_eq!(dispatch.quorum_results[0].signed_stake_percent, 100);

    // Every operator got exactly one signed request for the batch
    let received = h.nodes.received();
    assert_eq!(received.len(), 4);
    let submitted = h.chain.submissions();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].blob_header_hashes, vec![dispatch.blob_header_hash]);
    assert_eq!(submitted[0].attestations[0].len(), 4);
    assert_eq!(h.state.total_stake(0), u128::from(4 * TEST_STAKE));
}

#[tokio::test(start_paused = true)]
async fn test_run_loops_drive_blob_to_finalized() {
    let h = Harness::new();
    let batcher = h.batcher(config()).unwrap();
    let key = h.submit(b"payload").await;
    let (tx, rx) = tokio::sync::watch::channel(false);

    let chain = h.chain.clone();
    let drive = async {
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            chain.advance(1);
        }
        tx.send(true).unwrap();
    };
    let (result, _) = tokio::join!(batcher.run(rx), drive);
    result.unwrap();

    assert_eq!(h.status(&key).await, BlobStatus::Finalized);
    assert_eq!(
        h.store.transitions_of(&key),
        vec![
            (BlobStatus::Queued, BlobStatus::Encoded),
            (BlobStatus::Encoded, BlobStatus::Dispatched),
            (BlobStatus::Dispatched, BlobStatus::Confirmed),
            (BlobStatus::Confirmed, BlobStatus::Finalized),
        ]
    );
}
