use crate::bundle_download::BundleDownloader;
use crate::challenges::ChallengesRepository;
use crate::engine::DataModelEngine;
use crate::prometheus_metrics::{outcome, UploadWorkerMetrics};
use crate::store::Datastore;
use crate::uploads::UploadRepository;
use crate::workers::{PeriodicTask, WorkerLogger};
use serde_json::json;
use std::sync::Arc;
use tokio::time::Duration;

use super::strategies::UploadStrategy;

/// Turns claimed entities into on-chain bundle commitments, driven by the
/// upload strategy. Owns its sequence number and retry counter; neither is
/// shared or persisted.
pub struct UploadWorker<S, U, C, D, St>
where
    S: Datastore,
    U: UploadRepository,
    C: ChallengesRepository,
    D: BundleDownloader,
    St: UploadStrategy,
{
    engine: Arc<DataModelEngine<S, U, C, D>>,
    uploads: Arc<U>,
    strategy: St,
    logger: WorkerLogger<S>,
    metrics: Arc<UploadWorkerMetrics>,
    retry_period: u64,
    sequence_number: u64,
    since_last_retry: u64,
}

impl<S, U, C, D, St> UploadWorker<S, U, C, D, St>
where
    S: Datastore,
    U: UploadRepository,
    C: ChallengesRepository,
    D: BundleDownloader,
    St: UploadStrategy,
{
    pub fn new(
        engine: Arc<DataModelEngine<S, U, C, D>>,
        uploads: Arc<U>,
        strategy: St,
        logger: WorkerLogger<S>,
        metrics: Arc<UploadWorkerMetrics>,
        retry_period: u64,
    ) -> Self {
        Self {
            engine,
            uploads,
            strategy,
            logger,
            metrics,
            retry_period,
            sequence_number: 0,
            // The first tick always performs the retry sweep.
            since_last_retry: retry_period,
        }
    }

    async fn retry_upload_if_necessary(&mut self) {
        self.since_last_retry += 1;
        if self.since_last_retry < self.retry_period {
            return;
        }
        match self.engine.upload_not_registered_bundles().await {
            Ok(uploaded) if !uploaded.is_empty() => {
                self.metrics.bundles_retried.inc_by(uploaded.len() as u64);
                self.logger
                    .info(
                        "Uploaded bundles waiting for retry",
                        json!({"count": uploaded.len()}),
                    )
                    .await;
                self.since_last_retry = 0;
            }
            Ok(_) => {}
            Err(e) => {
                self.logger
                    .error("Bundle retry sweep failed", json!({"error": format!("{e:?}")}))
                    .await;
            }
        }
    }

    async fn tick_impl(&mut self) {
        let storage_periods = self.strategy.storage_periods();

        let enough_funds = match self
            .uploads
            .check_if_enough_funds_for_upload(storage_periods)
            .await
        {
            Ok(enough) => enough,
            Err(e) => {
                self.logger
                    .error("Failed to check upload funds", json!({"error": format!("{e:?}")}))
                    .await;
                return;
            }
        };
        if !enough_funds {
            self.metrics
                .tick_outcome
                .with_label_values(&[outcome::INSUFFICIENT_FUNDS])
                .inc();
            self.logger
                .info("Insufficient funds to upload bundle", json!({}))
                .await;
            return;
        }

        self.retry_upload_if_necessary().await;

        let items_count_limit = match self.uploads.bundle_items_count_limit().await {
            Ok(limit) => limit,
            Err(e) => {
                self.logger
                    .error(
                        "Failed to read bundle item limit",
                        json!({"error": format!("{e:?}")}),
                    )
                    .await;
                return;
            }
        };

        let candidate = match self
            .engine
            .initialise_bundling(self.sequence_number, items_count_limit)
            .await
        {
            Ok(candidate) => candidate,
            Err(e) => {
                self.logger
                    .error("Failed to initialise bundling", json!({"error": format!("{e:?}")}))
                    .await;
                return;
            }
        };

        if !self.strategy.should_bundle(&candidate) {
            if let Err(e) = self.engine.cancel_bundling(self.sequence_number).await {
                self.logger
                    .error("Failed to cancel bundling", json!({"error": format!("{e:?}")}))
                    .await;
                return;
            }
            self.metrics
                .tick_outcome
                .with_label_values(&[outcome::CANCELED])
                .inc();
            self.logger.info("Bundling process canceled", json!({})).await;
            return;
        }

        let result = self
            .engine
            .finalise_bundling(&candidate, self.sequence_number, storage_periods)
            .await;
        match result {
            Ok(Some(bundle)) => {
                self.metrics
                    .tick_outcome
                    .with_label_values(&[outcome::SUCCESS])
                    .inc();
                self.metrics.bundles_uploaded.inc();
                self.metrics
                    .entities_bundled
                    .set(candidate.entry_count() as f64);
                self.logger
                    .info("Bundle successfully uploaded", json!({"bundleId": bundle.bundle_id}))
                    .await;
                self.strategy.bundling_succeeded();
                self.sequence_number += 1;
            }
            Ok(None) => {
                self.metrics
                    .tick_outcome
                    .with_label_values(&[outcome::FAILURE])
                    .inc();
                self.logger.info("Bundle upload failed", json!({})).await;
            }
            Err(e) => {
                self.metrics
                    .tick_outcome
                    .with_label_values(&[outcome::FAILURE])
                    .inc();
                self.logger
                    .error("Bundle upload failed", json!({"error": format!("{e:?}")}))
                    .await;
            }
        }
    }
}

impl<S, U, C, D, St> PeriodicTask for UploadWorker<S, U, C, D, St>
where
    S: Datastore,
    U: UploadRepository,
    C: ChallengesRepository,
    D: BundleDownloader,
    St: UploadStrategy,
{
    fn name(&self) -> &'static str {
        "upload"
    }

    fn interval(&self) -> Duration {
        self.strategy.worker_interval()
    }

    async fn tick(&mut self) {
        self.metrics.ticks.inc();
        let timer = self.metrics.tick_duration_seconds.start_timer();
        self.tick_impl().await;
        timer.observe_duration();
    }
}
