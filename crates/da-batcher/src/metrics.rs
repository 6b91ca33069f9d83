//! Prometheus metrics for the batcher pipeline.
//!
//! All metrics follow the naming convention: `da_batcher_<metric>_<unit>`.
//! Each `BatcherMetrics` owns its registry so tests stay isolated.

use da_telemetry::HistogramTimer;
use prometheus::{
    exponential_buckets, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounterVec,
    IntGauge, Opts, Registry,
};
use shared_types::{BlobStatus, FailureReason, QuorumId};

use crate::error::Stage;

/// Metrics collector for the batcher
#[derive(Clone)]
pub struct BatcherMetrics {
    registry: Registry,
    batch_size_blobs: Histogram,
    batch_size_bytes: Gauge,
    stage_latency: HistogramVec,
    retries: IntCounterVec,
    failures: IntCounterVec,
    blobs: IntCounterVec,
    attestation_stake: GaugeVec,
    chain_head: IntGauge,
}

impl BatcherMetrics {
    /// Create collectors and register them on a fresh registry.
    ///
    /// Metric descriptors are static, so construction cannot fail.
    pub fn new() -> Self {
        let registry = Registry::new();

        let batch_size_blobs = Histogram::with_opts(
            HistogramOpts::new("da_batcher_batch_size_blobs", "Blobs cut into each batch")
                .buckets(exponential_buckets(1.0, 2.0, 10).expect("static buckets")),
        )
        .expect("metric creation failed");

        let batch_size_bytes = Gauge::new(
            "da_batcher_batch_size_bytes",
            "Payload bytes of the most recent batch",
        )
        .expect("metric creation failed");

        let stage_latency = HistogramVec::new(
            HistogramOpts::new(
                "da_batcher_stage_latency_seconds",
                "Time spent in each pipeline stage",
            )
            .buckets(exponential_buckets(0.005, 2.0, 14).expect("static buckets")),
            &["stage"],
        )
        .expect("metric creation failed");

        let retries = IntCounterVec::new(
            Opts::new("da_batcher_retries_total", "Per-blob retries by stage"),
            &["stage"],
        )
        .expect("metric creation failed");

        let failures = IntCounterVec::new(
            Opts::new("da_batcher_failures_total", "Blobs marked failed by reason"),
            &["reason"],
        )
        .expect("metric creation failed");

        let blobs = IntCounterVec::new(
            Opts::new("da_batcher_blobs_total", "Status transitions by target status"),
            &["status"],
        )
        .expect("metric creation failed");

        let attestation_stake = GaugeVec::new(
            Opts::new(
                "da_batcher_attestation_stake_percent",
                "Signed stake share of the last dispatched blob per quorum",
            ),
            &["quorum"],
        )
        .expect("metric creation failed");

        let chain_head = IntGauge::new("da_batcher_chain_head", "Latest chain head observed")
            .expect("metric creation failed");

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(batch_size_blobs.clone()),
            Box::new(batch_size_bytes.clone()),
            Box::new(stage_latency.clone()),
            Box::new(retries.clone()),
            Box::new(failures.clone()),
            Box::new(blobs.clone()),
            Box::new(attestation_stake.clone()),
            Box::new(chain_head.clone()),
        ];
        for collector in collectors {
            registry
                .register(collector)
                .expect("metric registration failed");
        }

        Self {
            registry,
            batch_size_blobs,
            batch_size_bytes,
            stage_latency,
            retries,
            failures,
            blobs,
            attestation_stake,
            chain_head,
        }
    }

    /// Registry to expose over HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a batch cut
    pub fn observe_batch(&self, blobs: usize, bytes: u64) {
        self.batch_size_blobs.observe(blobs as f64);
        self.batch_size_bytes.set(bytes as f64);
    }

    /// Start timing a stage; observed when the guard drops
    pub fn stage_timer(&self, stage: Stage) -> HistogramTimer {
        HistogramTimer::new(&self.stage_latency.with_label_values(&[stage.as_str()]))
    }

    pub fn record_retry(&self, stage: Stage) {
        self.retries.with_label_values(&[stage.as_str()]).inc();
    }

    pub fn record_failure(&self, reason: FailureReason) {
        self.failures.with_label_values(&[reason.as_str()]).inc();
        self.record_transition(BlobStatus::Failed);
    }

    pub fn record_transition(&self, status: BlobStatus) {
        self.blobs.with_label_values(&[status.as_str()]).inc();
    }

    pub fn set_attestation_stake(&self, quorum: QuorumId, percent: u8) {
        let label = quorum.to_string();
        self.attestation_stake
            .with_label_values(&[label.as_str()])
            .set(percent as f64);
    }

    pub fn set_chain_head(&self, head: u64) {
        self.chain_head.set(head.min(i64::MAX as u64) as i64);
    }

    pub fn retries(&self, stage: Stage) -> u64 {
        self.retries.with_label_values(&[stage.as_str()]).get()
    }

    pub fn failures(&self, reason: FailureReason) -> u64 {
        self.failures.with_label_values(&[reason.as_str()]).get()
    }

    pub fn transitions(&self, status: BlobStatus) -> u64 {
        self.blobs.with_label_values(&[status.as_str()]).get()
    }
}

impl Default for BatcherMetrics {
    fn default() -> Self {
        Self::new()
    }
}
