//! The orchestrator.
//!
//! Each cycle cuts queued blobs, encodes them, dispatches every encoded
//! blob and starts confirmations for dispatched blobs. Confirmations run
//! as background tasks so a slow chain never holds up the next cycle, and
//! the finalizer runs as its own loop.

use parking_lot::Mutex as SyncMutex;
use shared_crypto::Secp256k1KeyPair;
use shared_types::{Blob, BlobKey, BlobMetadata, BlobStatus, DispatchInfo, StatusUpdate};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::dispatcher::insufficient_error;
use super::{
    record_stage_failure, with_timeout, BlobFate, Confirmer, Dispatcher, EncodeJob,
    EncodedBlobCache, EncodedBlobRef, EncodingStage, Finalizer,
};
use crate::config::BatcherConfig;
use crate::domain::{
    encoding_params, BatchHeader, ConfirmationRecord, CycleReport, DispatchedBlob, EncodedBlob,
    OperatorState, RetryPolicy,
};
use crate::error::{BatcherError, Result, Stage};
use crate::metrics::BatcherMetrics;
use crate::ports::{BlobStore, ChainClient, EncoderClient, OperatorRegistry, StorageNodeClient};

/// Collaborators injected into the batcher.
pub struct BatcherDeps {
    pub store: Arc<dyn BlobStore>,
    pub encoder: Arc<dyn EncoderClient>,
    pub registry: Arc<dyn OperatorRegistry>,
    pub nodes: Arc<dyn StorageNodeClient>,
    pub chain: Arc<dyn ChainClient>,
    pub signer: Arc<Secp256k1KeyPair>,
    pub metrics: BatcherMetrics,
}

type ConfirmationOutcome = (Vec<BlobKey>, Result<ConfirmationRecord>);

/// Releases the keys of a confirmation task however it ends.
struct InFlight {
    keys: Vec<BlobKey>,
    set: Arc<SyncMutex<HashSet<BlobKey>>>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut set = self.set.lock();
        for key in &self.keys {
            set.remove(key);
        }
    }
}

pub struct Batcher {
    config: BatcherConfig,
    store: Arc<dyn BlobStore>,
    registry: Arc<dyn OperatorRegistry>,
    chain: Arc<dyn ChainClient>,
    policy: RetryPolicy,
    metrics: BatcherMetrics,
    encoding: EncodingStage,
    cache: EncodedBlobCache,
    dispatcher: Dispatcher,
    confirmer: Arc<Confirmer>,
    finalizer: Arc<Finalizer>,
    confirmations: Mutex<JoinSet<ConfirmationOutcome>>,
    in_flight: Arc<SyncMutex<HashSet<BlobKey>>>,
}

impl Batcher {
    /// Validate the configuration and wire the stages together.
    pub fn new(config: BatcherConfig, deps: BatcherDeps) -> Result<Self> {
        config.validate()?;

        let policy = RetryPolicy::new(
            config.max_num_retries_per_blob,
            config.retry_backoff_base(),
            config.retry_backoff_max(),
        );
        let encoding = EncodingStage::new(
            deps.encoder,
            config.num_encoding_workers,
            config.timeouts.encoding(),
        );
        let dispatcher = Dispatcher::new(
            deps.nodes,
            deps.signer,
            config.timeouts.attestation(),
            deps.metrics.clone(),
        );
        let confirmer = Arc::new(Confirmer::new(
            Arc::clone(&deps.chain),
            Arc::clone(&deps.store),
            policy.clone(),
            deps.metrics.clone(),
            config.timeouts.clone(),
            config.confirmation_poll_interval(),
        ));
        let finalizer = Arc::new(Finalizer::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.chain),
            policy.clone(),
            deps.metrics.clone(),
            config.finalization_interval,
            config.finalizer_interval(),
            config.finalizer_batch_limit,
            config.timeouts.chain_read(),
        ));

        Ok(Self {
            config,
            store: deps.store,
            registry: deps.registry,
            chain: deps.chain,
            policy,
            metrics: deps.metrics,
            encoding,
            cache: EncodedBlobCache::new(),
            dispatcher,
            confirmer,
            finalizer,
            confirmations: Mutex::new(JoinSet::new()),
            in_flight: Arc::default(),
        })
    }

    pub fn finalizer(&self) -> Arc<Finalizer> {
        Arc::clone(&self.finalizer)
    }

    pub fn metrics(&self) -> &BatcherMetrics {
        &self.metrics
    }

    /// Blobs with an encoding waiting to be dispatched.
    pub fn cached_encodings(&self) -> usize {
        self.cache.len()
    }

    /// Blobs currently held by a running confirmation.
    pub fn confirming(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// One pass through cut, encode, dispatch and confirmation hand-off.
    ///
    /// Errors only when the chain head, operator set or store is
    /// unavailable; the cycle is then skipped and nothing changes.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.reap_confirmations().await;

        let reference_block = with_timeout(
            Stage::Dispatch,
            self.config.timeouts.chain_read(),
            self.chain.block_number(),
        )
        .await?;
        let state = with_timeout(
            Stage::Dispatch,
            self.config.timeouts.chain_read(),
            self.registry.operator_state(reference_block),
        )
        .await?;
        self.metrics.set_chain_head(reference_block);

        let mut report = CycleReport {
            reference_block,
            ..CycleReport::default()
        };

        let queued = self
            .store
            .get_by_status(BlobStatus::Queued, self.config.max_batch_blobs)
            .await?;
        let cut = cut_batch(queued, self.config.max_batch_bytes);
        report.cut = cut.len();
        if !cut.is_empty() {
            let bytes: u64 = cut.iter().map(|b| b.data.len() as u64).sum();
            self.metrics.observe_batch(cut.len(), bytes);
            debug!(blobs = cut.len(), bytes, "[batcher] Batch cut");
        }

        self.encode_cut(cut, &state, &mut report).await?;
        self.dispatch_encoded(&state, &mut report).await?;
        self.start_confirmations(&mut report).await?;

        if report.is_idle() {
            debug!(reference_block, "[batcher] Nothing to do");
        } else {
            info!(
                reference_block,
                cut = report.cut,
                encoded = report.encoded,
                dispatched = report.dispatched,
                retried = report.retried,
                failed = report.failed,
                confirmations = report.confirmations_started,
                "[batcher] Cycle complete"
            );
        }
        Ok(report)
    }

    async fn encode_cut(
        &self,
        cut: Vec<Blob>,
        state: &OperatorState,
        report: &mut CycleReport,
    ) -> Result<()> {
        if cut.is_empty() {
            return Ok(());
        }
        let _timer = self.metrics.stage_timer(Stage::Encode);

        let mut metas = HashMap::with_capacity(cut.len());
        let mut jobs = Vec::with_capacity(cut.len());
        for blob in cut {
            match encoding_params(state, &blob.metadata.security_params) {
                Ok(params) => {
                    jobs.push(EncodeJob {
                        key: blob.key(),
                        data: blob.data,
                        params,
                    });
                    metas.insert(blob.metadata.key, blob.metadata);
                }
                Err(err) => {
                    self.charge(report, &blob.metadata, BlobStatus::Queued, Stage::Encode, &err)
                        .await?;
                }
            }
        }

        for (key, result) in self.encoding.encode_all(jobs).await {
            let Some(meta) = metas.get(&key) else {
                continue;
            };
            match result {
                Ok(encoded) => {
                    if self
                        .store
                        .update_status(&key, BlobStatus::Queued, StatusUpdate::to(BlobStatus::Encoded))
                        .await?
                    {
                        self.cache.insert(key, encoded);
                        self.metrics.record_transition(BlobStatus::Encoded);
                        report.encoded += 1;
                        debug!(key = %key.short(), "[batcher] Blob encoded");
                    } else {
                        debug!(key = %key.short(), "[batcher] Blob moved while encoding");
                    }
                }
                Err(err) => {
                    self.charge(report, meta, BlobStatus::Queued, Stage::Encode, &err)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Dispatch every `Encoded` blob, re-encoding those whose chunks are
    /// not cached or were cut for a different operator set.
    async fn dispatch_encoded(&self, state: &OperatorState, report: &mut CycleReport) -> Result<()> {
        let encoded = self
            .store
            .get_by_status(BlobStatus::Encoded, self.config.max_batch_blobs)
            .await?;
        if encoded.is_empty() {
            return Ok(());
        }

        let mut ready: Vec<(BlobMetadata, EncodedBlob)> = Vec::with_capacity(encoded.len());
        let mut stale: Vec<(BlobMetadata, EncodeJob)> = Vec::new();
        for blob in encoded {
            let params = match encoding_params(state, &blob.metadata.security_params) {
                Ok(params) => params,
                Err(err) => {
                    self.charge(report, &blob.metadata, BlobStatus::Encoded, Stage::Dispatch, &err)
                        .await?;
                    continue;
                }
            };
            let key = blob.key();
            match self.cache.get(&key) {
                Some(cached) if cached.matches(&params) => ready.push((blob.metadata, cached)),
                _ => stale.push((
                    blob.metadata,
                    EncodeJob {
                        key,
                        data: blob.data,
                        params,
                    },
                )),
            }
        }

        if !stale.is_empty() {
            debug!(blobs = stale.len(), "[batcher] Re-encoding blobs without cached chunks");
            let (metas, jobs): (Vec<BlobMetadata>, Vec<EncodeJob>) = stale.into_iter().unzip();
            let results = self.encoding.encode_all(jobs).await;
            for (meta, (key, result)) in metas.into_iter().zip(results) {
                match result {
                    Ok(encoded) => {
                        self.cache.insert(key, encoded.clone());
                        ready.push((meta, encoded));
                    }
                    Err(err) => {
                        self.charge(report, &meta, BlobStatus::Encoded, Stage::Encode, &err)
                            .await?;
                    }
                }
            }
        }
        if ready.is_empty() {
            return Ok(());
        }

        let refs: Vec<EncodedBlobRef> = ready
            .iter()
            .map(|(meta, encoded)| EncodedBlobRef::new(meta.key, encoded.clone(), &meta.security_params))
            .collect();
        let hashes: Vec<_> = refs.iter().map(|r| r.header.hash()).collect();
        let header = BatchHeader::build(
            state.block_number,
            &hashes,
            refs.iter().flat_map(|r| &r.header.security_params),
        );

        let result = self.dispatcher.dispatch(&header, &refs, state).await;

        for ((meta, _), (blob, outcome)) in ready.iter().zip(refs.iter().zip(result.per_blob)) {
            if outcome.sufficient {
                let info = DispatchInfo {
                    reference_block_number: state.block_number,
                    blob_header_hash: outcome.blob_header_hash,
                    commitment: outcome.commitment,
                    attestations: outcome.attestations,
                    quorum_results: outcome.quorum_results,
                };
                if self
                    .store
                    .update_status(&meta.key, BlobStatus::Encoded, StatusUpdate::dispatched(info))
                    .await?
                {
                    self.metrics.record_transition(BlobStatus::Dispatched);
                    report.dispatched += 1;
                }
                self.cache.remove(&meta.key);
            } else {
                let err = insufficient_error(&outcome, blob)
                    .unwrap_or_else(|| BatcherError::Dispatch("attestation below threshold".into()));
                if self
                    .charge(report, meta, BlobStatus::Encoded, Stage::Dispatch, &err)
                    .await?
                    == BlobFate::Failed
                {
                    self.cache.remove(&meta.key);
                }
            }
        }
        Ok(())
    }

    /// Group dispatched blobs by reference block and confirm each group in
    /// the background.
    async fn start_confirmations(&self, report: &mut CycleReport) -> Result<()> {
        let dispatched = self
            .store
            .get_by_status(BlobStatus::Dispatched, self.config.max_batch_blobs)
            .await?;

        let mut groups: BTreeMap<u64, Vec<Blob>> = BTreeMap::new();
        {
            let in_flight = self.in_flight.lock();
            for blob in dispatched {
                if in_flight.contains(&blob.key()) {
                    continue;
                }
                let Some(info) = &blob.metadata.dispatch else {
                    warn!(key = %blob.key().short(), "[batcher] Dispatched blob has no dispatch record");
                    continue;
                };
                groups.entry(info.reference_block_number).or_default().push(blob);
            }
        }

        let mut tasks = self.confirmations.lock().await;
        for (reference_block, blobs) in groups {
            let mut dispatched = Vec::with_capacity(blobs.len());
            for blob in &blobs {
                if let Some(info) = &blob.metadata.dispatch {
                    dispatched.push(DispatchedBlob {
                        key: blob.key(),
                        blob_header_hash: info.blob_header_hash,
                        attestations: info.attestations.clone(),
                    });
                }
            }
            let hashes: Vec<_> = dispatched.iter().map(|b| b.blob_header_hash).collect();
            let header = BatchHeader::build(
                reference_block,
                &hashes,
                blobs.iter().flat_map(|b| &b.metadata.security_params),
            );
            let keys: Vec<BlobKey> = dispatched.iter().map(|b| b.key).collect();

            self.in_flight.lock().extend(keys.iter().copied());
            let guard = InFlight {
                keys: keys.clone(),
                set: Arc::clone(&self.in_flight),
            };
            let confirmer = Arc::clone(&self.confirmer);
            debug!(
                batch = %hex::encode(&header.hash()[..6]),
                reference_block,
                blobs = keys.len(),
                "[batcher] Starting confirmation"
            );
            tasks.spawn(async move {
                let _guard = guard;
                let result = confirmer.confirm(&header, &dispatched).await;
                (keys, result)
            });
            report.confirmations_started += 1;
        }
        Ok(())
    }

    async fn charge(
        &self,
        report: &mut CycleReport,
        meta: &BlobMetadata,
        current: BlobStatus,
        stage: Stage,
        err: &BatcherError,
    ) -> Result<BlobFate> {
        let fate = record_stage_failure(
            self.store.as_ref(),
            &self.policy,
            &self.metrics,
            meta,
            current,
            stage,
            err,
        )
        .await?;
        match fate {
            BlobFate::Retrying { .. } => report.retried += 1,
            BlobFate::Failed => report.failed += 1,
            BlobFate::Conflict => {}
        }
        Ok(fate)
    }

    /// Collect finished confirmation tasks without waiting.
    async fn reap_confirmations(&self) {
        let mut tasks = self.confirmations.lock().await;
        while let Some(joined) = tasks.try_join_next() {
            log_confirmation(joined);
        }
    }

    /// Wait for every running confirmation and return their outcomes.
    pub async fn await_confirmations(&self) -> Vec<Result<ConfirmationRecord>> {
        let mut tasks = self.confirmations.lock().await;
        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Some(outcome) = log_confirmation(joined) {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    /// Give running confirmations up to `grace` to finish, then abort them.
    ///
    /// Aborted blobs stay `Dispatched` and are picked up again on restart.
    pub async fn drain_confirmations(&self, grace: Duration) {
        if tokio::time::timeout(grace, self.await_confirmations())
            .await
            .is_err()
        {
            let mut tasks = self.confirmations.lock().await;
            warn!(
                aborted = tasks.len(),
                grace_secs = grace.as_secs(),
                "[batcher] Shutdown grace elapsed, aborting confirmations"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }

    /// Run cycles every pull interval until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            interval_ms = self.config.pull_interval_ms,
            max_batch_blobs = self.config.max_batch_blobs,
            max_retries = self.config.max_num_retries_per_blob,
            "[batcher] Started"
        );
        let finalizer = tokio::spawn(Arc::clone(&self.finalizer).run(shutdown.clone()));
        let mut ticker = tokio::time::interval(self.config.pull_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        warn!(error = %e, "[batcher] Cycle skipped");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("[batcher] Shutting down");
        self.drain_confirmations(self.config.timeouts.shutdown_grace())
            .await;
        match finalizer.await {
            Ok(result) => result?,
            Err(e) => error!(error = %e, "[batcher] Finalizer task failed"),
        }
        info!("[batcher] Stopped");
        Ok(())
    }
}

/// Oldest-first prefix of `queued` that fits in `max_bytes`. The first blob
/// is always taken so an oversize blob cannot block the queue.
fn cut_batch(queued: Vec<Blob>, max_bytes: u64) -> Vec<Blob> {
    let mut total = 0u64;
    let mut cut = Vec::with_capacity(queued.len());
    for blob in queued {
        let size = blob.data.len() as u64;
        if !cut.is_empty() && total.saturating_add(size) > max_bytes {
            break;
        }
        total = total.saturating_add(size);
        cut.push(blob);
    }
    cut
}

fn log_confirmation(
    joined: std::result::Result<ConfirmationOutcome, JoinError>,
) -> Option<Result<ConfirmationRecord>> {
    match joined {
        Ok((keys, Ok(record))) => {
            debug!(
                blobs = keys.len(),
                block = record.confirmation_block,
                "[batcher] Confirmation finished"
            );
            Some(Ok(record))
        }
        Ok((keys, Err(e))) => {
            // Abandoned batches were already reported by the confirmer
            if !matches!(e, BatcherError::BatchAbandoned { .. }) {
                warn!(blobs = keys.len(), error = %e, "[batcher] Confirmation did not complete");
            }
            Some(Err(e))
        }
        Err(e) if e.is_cancelled() => None,
        Err(e) => {
            error!(error = %e, "[batcher] Confirmation task panicked");
            None
        }
    }
}
