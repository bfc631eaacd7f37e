use crate::bundle_download::BundleDownloader;
use crate::challenges::{Challenge, ChallengesRepository};
use crate::engine::DataModelEngine;
use crate::failed_challenges::FailedChallengesCache;
use crate::prometheus_metrics::ChallengeWorkerMetrics;
use crate::store::Datastore;
use crate::uploads::UploadRepository;
use crate::workers::{PeriodicTask, WorkerLogger};
use serde_json::json;
use std::sync::Arc;
use tokio::time::Duration;

use super::strategies::ChallengeStrategy;

/// Competes for on-chain shelter challenges: downloads the challenged
/// bundle from its current shelterer and resolves the challenge. At most one
/// challenge is resolved per tick; failures are negatively cached and never
/// abort the tick.
pub struct ChallengeWorker<S, U, C, D, St>
where
    S: Datastore,
    U: UploadRepository,
    C: ChallengesRepository,
    D: BundleDownloader,
    St: ChallengeStrategy,
{
    engine: Arc<DataModelEngine<S, U, C, D>>,
    challenges: Arc<C>,
    strategy: St,
    failed_challenges: FailedChallengesCache,
    logger: WorkerLogger<S>,
    metrics: Arc<ChallengeWorkerMetrics>,
}

impl<S, U, C, D, St> ChallengeWorker<S, U, C, D, St>
where
    S: Datastore,
    U: UploadRepository,
    C: ChallengesRepository,
    D: BundleDownloader,
    St: ChallengeStrategy,
{
    pub fn new(
        engine: Arc<DataModelEngine<S, U, C, D>>,
        challenges: Arc<C>,
        strategy: St,
        failed_challenges: FailedChallengesCache,
        logger: WorkerLogger<S>,
        metrics: Arc<ChallengeWorkerMetrics>,
    ) -> Self {
        Self {
            engine,
            challenges,
            strategy,
            failed_challenges,
            logger,
            metrics,
        }
    }

    async fn try_with_challenge(&mut self, challenge: &Challenge) -> bool {
        if self
            .failed_challenges
            .did_challenge_fail_recently(&challenge.challenge_id)
        {
            return false;
        }

        match self.attempt_resolution(challenge).await {
            Ok(resolved) => resolved,
            Err(e) => {
                self.failed_challenges
                    .remember_failed_challenge(&challenge.challenge_id, self.strategy.retry_timeout());
                self.metrics.challenges_failed.inc();
                self.logger
                    .error(
                        "Failed to resolve challenge",
                        json!({
                            "challengeId": challenge.challenge_id,
                            "bundleId": challenge.bundle_id,
                            "error": format!("{e:?}"),
                        }),
                    )
                    .await;
                false
            }
        }
    }

    async fn attempt_resolution(&mut self, challenge: &Challenge) -> anyhow::Result<bool> {
        if !self.strategy.should_fetch_bundle(challenge) {
            self.logger
                .info(
                    "Decided not to download bundle",
                    json!({"challengeId": challenge.challenge_id}),
                )
                .await;
            return Ok(false);
        }

        let bundle = self
            .engine
            .download_bundle(&challenge.bundle_id, &challenge.shelterer_id)
            .await?;

        if !self.strategy.should_resolve_challenge(&bundle) {
            self.logger
                .info(
                    "Challenge resolution cancelled",
                    json!({"challengeId": challenge.challenge_id}),
                )
                .await;
            return Ok(false);
        }

        self.challenges
            .resolve_challenge(&challenge.challenge_id)
            .await?;
        self.engine
            .update_sheltering_expiration_date(&bundle.bundle_id)
            .await?;
        self.strategy.after_challenge_resolution(&bundle);
        self.metrics.challenges_resolved.inc();
        self.logger
            .info(
                "Challenge resolved",
                json!({
                    "challengeId": challenge.challenge_id,
                    "bundleId": bundle.bundle_id,
                }),
            )
            .await;
        Ok(true)
    }

    async fn tick_impl(&mut self) {
        let challenges = match self.challenges.ongoing_challenges().await {
            Ok(challenges) => challenges,
            Err(e) => {
                self.logger
                    .error(
                        "Failed to read challenge feed",
                        json!({"error": format!("{e:?}")}),
                    )
                    .await;
                return;
            }
        };

        self.metrics.challenges_seen.inc_by(challenges.len() as u64);
        self.logger
            .info("Challenges found", json!({"count": challenges.len()}))
            .await;

        for challenge in &challenges {
            if self.try_with_challenge(challenge).await {
                break;
            }
        }

        self.failed_challenges.clear_outdated_challenges();
    }
}

impl<S, U, C, D, St> PeriodicTask for ChallengeWorker<S, U, C, D, St>
where
    S: Datastore,
    U: UploadRepository,
    C: ChallengesRepository,
    D: BundleDownloader,
    St: ChallengeStrategy,
{
    fn name(&self) -> &'static str {
        "challenge"
    }

    fn interval(&self) -> Duration {
        self.strategy.worker_interval()
    }

    async fn tick(&mut self) {
        self.metrics.ticks.inc();
        self.tick_impl().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prometheus_metrics::Metrics;
    use crate::repository::EntityRepository;
    use crate::store::memory::MemoryDatastore;
    use crate::uploads::{BundleProof, UploadRepository};
    use crate::worker_logs::WorkerLogRepository;
    use alloy::primitives::U256;
    use ambrosus_node_shared::crypto;
    use ambrosus_node_shared::entities::Bundle;
    use ambrosus_node_shared::validation::{self, EntityValidator};
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const SECRET: &str = "0x4646464646464646464646464646464646464646464646464646464646464646";
    const SHELTERER: &str = "0x742e62cc7a19ef7d9c44306c07fad54b5bf6d4be";

    struct NoUploads;

    impl UploadRepository for NoUploads {
        async fn check_if_enough_funds_for_upload(&self, _periods: u64) -> anyhow::Result<bool> {
            Ok(true)
        }

        async fn bundle_items_count_limit(&self) -> anyhow::Result<u64> {
            Ok(100)
        }

        async fn get_upload_fee(&self, _periods: u64) -> anyhow::Result<U256> {
            Ok(U256::ZERO)
        }

        async fn upload_bundle(&self, _id: &str, _periods: u64) -> anyhow::Result<BundleProof> {
            anyhow::bail!("not needed")
        }
    }

    #[derive(Default)]
    struct ScriptedChallenges {
        feed: Mutex<Vec<Challenge>>,
        resolved: Mutex<Vec<String>>,
        expirations: Mutex<Vec<String>>,
    }

    impl ChallengesRepository for ScriptedChallenges {
        async fn ongoing_challenges(&self) -> anyhow::Result<Vec<Challenge>> {
            Ok(self.feed.lock().unwrap().clone())
        }

        async fn resolve_challenge(&self, challenge_id: &str) -> anyhow::Result<()> {
            self.resolved.lock().unwrap().push(challenge_id.to_owned());
            Ok(())
        }

        async fn shelterer_url(&self, _shelterer_id: &str) -> anyhow::Result<String> {
            Ok("https://peer.example.com".to_owned())
        }

        async fn update_sheltering_expiration_date(&self, bundle_id: &str) -> anyhow::Result<()> {
            self.expirations.lock().unwrap().push(bundle_id.to_owned());
            Ok(())
        }
    }

    #[derive(Default)]
    struct ScriptedDownloads {
        bundles: Mutex<HashMap<String, Bundle>>,
        attempts: Arc<Mutex<Vec<String>>>,
    }

    impl BundleDownloader for ScriptedDownloads {
        async fn download_bundle(&self, _url: &str, bundle_id: &str) -> anyhow::Result<Bundle> {
            self.attempts.lock().unwrap().push(bundle_id.to_owned());
            self.bundles
                .lock()
                .unwrap()
                .get(bundle_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("bundle {bundle_id} unavailable"))
        }
    }

    struct CountingStrategy {
        fetch: bool,
        resolve: bool,
        resolutions: Arc<AtomicUsize>,
    }

    impl ChallengeStrategy for CountingStrategy {
        fn worker_interval(&self) -> Duration {
            Duration::from_millis(5)
        }

        fn retry_timeout(&self) -> u64 {
            600
        }

        fn should_fetch_bundle(&self, _challenge: &Challenge) -> bool {
            self.fetch
        }

        fn should_resolve_challenge(&self, _bundle: &Bundle) -> bool {
            self.resolve
        }

        fn after_challenge_resolution(&mut self, _bundle: &Bundle) {
            self.resolutions.fetch_add(1, Ordering::SeqCst);
        }
    }

    type TestWorker = ChallengeWorker<
        MemoryDatastore,
        NoUploads,
        ScriptedChallenges,
        ScriptedDownloads,
        CountingStrategy,
    >;

    struct Fixture {
        worker: TestWorker,
        challenges: Arc<ScriptedChallenges>,
        resolutions: Arc<AtomicUsize>,
        logs: Arc<WorkerLogRepository<MemoryDatastore>>,
        download_attempts: Arc<Mutex<Vec<String>>>,
    }

    fn sheltered_bundle() -> Bundle {
        let secret = crypto::decode_secret(SECRET).unwrap();
        validation::assemble_bundle(&[], &[], Utc::now().timestamp() as u64, &secret).unwrap()
    }

    fn challenge(id: &str, bundle_id: &str) -> Challenge {
        Challenge {
            challenge_id: id.to_owned(),
            shelterer_id: SHELTERER.to_owned(),
            bundle_id: bundle_id.to_owned(),
            active_count: 1,
        }
    }

    fn fixture(fetch: bool, resolve: bool, bundles: Vec<Bundle>) -> Fixture {
        let store = Arc::new(MemoryDatastore::new());
        let challenges = Arc::new(ScriptedChallenges::default());
        let downloads = ScriptedDownloads::default();
        let download_attempts = Arc::clone(&downloads.attempts);
        for bundle in bundles {
            downloads
                .bundles
                .lock()
                .unwrap()
                .insert(bundle.bundle_id.clone(), bundle);
        }
        let engine = Arc::new(DataModelEngine::new(
            EntityValidator::default(),
            EntityRepository::new(Arc::clone(&store)),
            Arc::new(NoUploads),
            Arc::clone(&challenges),
            downloads,
            crypto::decode_secret(SECRET).unwrap(),
            4,
        ));
        let resolutions = Arc::new(AtomicUsize::new(0));
        let logs = Arc::new(WorkerLogRepository::new(Arc::clone(&store)));
        let metrics = Metrics::new("challenge_worker_test");
        let worker = ChallengeWorker::new(
            engine,
            Arc::clone(&challenges),
            CountingStrategy {
                fetch,
                resolve,
                resolutions: Arc::clone(&resolutions),
            },
            FailedChallengesCache::new(),
            WorkerLogger::new("challenge", Arc::clone(&logs)),
            Arc::clone(&metrics.challenge),
        );
        Fixture {
            worker,
            challenges,
            resolutions,
            logs,
            download_attempts,
        }
    }

    #[tokio::test]
    async fn resolves_at_most_one_challenge_per_tick() {
        let first = sheltered_bundle();
        let mut fx = fixture(true, true, vec![first.clone()]);
        *fx.challenges.feed.lock().unwrap() = vec![
            challenge("0xc1", &first.bundle_id),
            challenge("0xc2", &first.bundle_id),
        ];

        fx.worker.tick_impl().await;

        assert_eq!(fx.challenges.resolved.lock().unwrap().as_slice(), &["0xc1".to_owned()]);
        assert_eq!(
            fx.challenges.expirations.lock().unwrap().as_slice(),
            &[first.bundle_id.clone()]
        );
        assert_eq!(fx.resolutions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_caches_challenge_and_continues_with_the_next() {
        let available = sheltered_bundle();
        let mut fx = fixture(true, true, vec![available.clone()]);
        *fx.challenges.feed.lock().unwrap() = vec![
            challenge("0xbad", "0xmissing"),
            challenge("0xgood", &available.bundle_id),
        ];

        fx.worker.tick_impl().await;

        // The broken challenge did not stop the tick.
        assert_eq!(
            fx.challenges.resolved.lock().unwrap().as_slice(),
            &["0xgood".to_owned()]
        );
        assert!(fx.worker.failed_challenges.did_challenge_fail_recently("0xbad"));

        // On the next tick the cached failure is skipped without a retry:
        // the missing bundle is only ever attempted once.
        fx.worker.tick_impl().await;
        let attempts = fx.download_attempts.lock().unwrap();
        assert_eq!(
            attempts.iter().filter(|id| id.as_str() == "0xmissing").count(),
            1
        );
        drop(attempts);

        let logs = fx.logs.latest_logs(50).await.unwrap();
        assert!(logs.iter().any(|l| l["message"] == "Failed to resolve challenge"));
    }

    #[tokio::test]
    async fn strategy_decline_is_not_cached_as_failure() {
        let mut fx = fixture(false, true, vec![]);
        *fx.challenges.feed.lock().unwrap() = vec![challenge("0xc1", "0xb1")];

        fx.worker.tick_impl().await;

        assert!(fx.challenges.resolved.lock().unwrap().is_empty());
        assert!(fx.worker.failed_challenges.is_empty());
        let logs = fx.logs.latest_logs(10).await.unwrap();
        assert!(logs.iter().any(|l| l["message"] == "Decided not to download bundle"));
    }

    #[tokio::test]
    async fn resolution_cancelled_by_strategy_after_download() {
        let bundle = sheltered_bundle();
        let mut fx = fixture(true, false, vec![bundle.clone()]);
        *fx.challenges.feed.lock().unwrap() = vec![challenge("0xc1", &bundle.bundle_id)];

        fx.worker.tick_impl().await;

        assert!(fx.challenges.resolved.lock().unwrap().is_empty());
        assert!(fx.worker.failed_challenges.is_empty());
        let logs = fx.logs.latest_logs(10).await.unwrap();
        assert!(logs.iter().any(|l| l["message"] == "Challenge resolution cancelled"));
    }

    #[tokio::test]
    async fn empty_feed_logs_count() {
        let mut fx = fixture(true, true, vec![]);
        fx.worker.tick_impl().await;

        let logs = fx.logs.latest_logs(10).await.unwrap();
        let found = logs
            .iter()
            .find(|l| l["message"] == "Challenges found")
            .unwrap();
        assert_eq!(found["extras"]["count"], 0);
    }
}
