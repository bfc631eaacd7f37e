use crate::bundle_download::BundleDownloader;
use crate::challenges::ChallengesRepository;
use crate::repository::{EntityRepository, FindAssetsResult, FindEventsResult, RepositoryError};
use crate::store::Datastore;
use crate::uploads::UploadRepository;
use ambrosus_node_shared::entities::{Asset, Bundle, Event};
use ambrosus_node_shared::query::{FindAssetsParams, FindEventsParams};
use ambrosus_node_shared::validation::{
    self, EntityValidator, ValidationError,
};
use anyhow::Context;
use chrono::Utc;
use k256::ecdsa::SigningKey;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Claim stubs all share this prefix; anything carrying it in `bundleId` is
/// an in-progress (or crash-orphaned) claim, never a committed bundle.
pub const STUB_PREFIX: &str = "stub:";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// A bundle assembled from freshly claimed entities, not yet committed
/// on-chain. The upload strategy decides its fate.
#[derive(Debug, Clone)]
pub struct BundleCandidate {
    pub bundle: Bundle,
    pub asset_count: usize,
    pub event_count: usize,
}

impl BundleCandidate {
    pub fn entry_count(&self) -> usize {
        self.asset_count + self.event_count
    }
}

/// Orchestrates validator, repository and chain adapters for ingress,
/// bundling and sheltering.
pub struct DataModelEngine<S, U, C, D>
where
    S: Datastore,
    U: UploadRepository,
    C: ChallengesRepository,
    D: BundleDownloader,
{
    validator: EntityValidator,
    repository: EntityRepository<S>,
    uploads: Arc<U>,
    challenges: Arc<C>,
    downloader: D,
    secret: SigningKey,
    default_storage_periods: u64,
    stub_namespace: String,
}

fn now_seconds() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

impl<S, U, C, D> DataModelEngine<S, U, C, D>
where
    S: Datastore,
    U: UploadRepository,
    C: ChallengesRepository,
    D: BundleDownloader,
{
    pub fn new(
        validator: EntityValidator,
        repository: EntityRepository<S>,
        uploads: Arc<U>,
        challenges: Arc<C>,
        downloader: D,
        secret: SigningKey,
        default_storage_periods: u64,
    ) -> Self {
        // Stubs are namespaced per process, so a restart never reuses one.
        let stub_namespace = format!("{STUB_PREFIX}{:08x}:", rand::random::<u32>());
        Self {
            validator,
            repository,
            uploads,
            challenges,
            downloader,
            secret,
            default_storage_periods,
            stub_namespace,
        }
    }

    fn stub_id(&self, sequence_number: u64) -> String {
        format!("{}{}", self.stub_namespace, sequence_number)
    }

    // --- ingress ---

    pub async fn create_asset(&self, raw: &Value) -> Result<Asset, EngineError> {
        let asset = self.validator.parse_asset(raw)?;
        self.validator.validate_asset(&asset, now_seconds())?;
        self.repository.store_asset(&asset).await?;
        tracing::debug!(asset_id = %asset.asset_id, "Stored asset");
        Ok(asset)
    }

    pub async fn create_event(&self, raw: &Value) -> Result<Event, EngineError> {
        let event = self.validator.parse_event(raw)?;
        self.validator.validate_event(&event, now_seconds())?;
        let stamped = validation::set_entity_upload_timestamp(&event, now_seconds());
        self.repository.store_event(&stamped).await?;
        tracing::debug!(event_id = %stamped.event_id, "Stored event");
        Ok(stamped)
    }

    pub async fn get_asset(&self, asset_id: &str) -> Result<Option<Asset>, EngineError> {
        Ok(self.repository.get_asset(asset_id).await?)
    }

    pub async fn get_event(
        &self,
        event_id: &str,
        access_level: u64,
    ) -> Result<Option<Event>, EngineError> {
        Ok(self.repository.get_event(event_id, access_level).await?)
    }

    pub async fn find_events(
        &self,
        params: &FindEventsParams,
        access_level: u64,
    ) -> Result<FindEventsResult, EngineError> {
        Ok(self.repository.find_events(params, access_level).await?)
    }

    pub async fn find_assets(
        &self,
        params: &FindAssetsParams,
    ) -> Result<FindAssetsResult, EngineError> {
        Ok(self.repository.find_assets(params).await?)
    }

    pub async fn get_bundle(&self, bundle_id: &str) -> Result<Option<Bundle>, EngineError> {
        Ok(self.repository.get_bundle(bundle_id).await?)
    }

    // --- bundling ---

    /// Frees claims left behind by a previous process. Safe to call only
    /// before this node's own workers start claiming.
    pub async fn release_orphaned_claims(&self) -> anyhow::Result<u64> {
        let released = self
            .repository
            .release_stale_claims(STUB_PREFIX)
            .await
            .context("Failed to release orphaned bundle claims")?;
        if released > 0 {
            tracing::info!(released, "Released orphaned bundle claims");
        }
        Ok(released)
    }

    /// Claims every free entity under this sequence number's stub, trims the
    /// claim to the on-chain item limit, and assembles the candidate bundle.
    pub async fn initialise_bundling(
        &self,
        sequence_number: u64,
        items_count_limit: u64,
    ) -> anyhow::Result<BundleCandidate> {
        let stub_id = self.stub_id(sequence_number);
        let (mut assets, mut events) = self
            .repository
            .begin_bundle(&stub_id)
            .await
            .context("Failed to claim entities for bundling")?;

        let limit = items_count_limit as usize;
        if assets.len() + events.len() > limit {
            let kept_assets = assets.len().min(limit);
            let kept_events = limit - kept_assets;
            let extra_assets: Vec<String> = assets
                .split_off(kept_assets)
                .into_iter()
                .map(|a| a.asset_id)
                .collect();
            let extra_events: Vec<String> = events
                .split_off(kept_events)
                .into_iter()
                .map(|e| e.event_id)
                .collect();
            tracing::debug!(
                released_assets = extra_assets.len(),
                released_events = extra_events.len(),
                "Claim exceeds bundle item limit, releasing the excess"
            );
            self.repository
                .release_claimed_entities(&stub_id, &extra_assets, &extra_events)
                .await?;
        }

        let bundle =
            validation::assemble_bundle(&assets, &events, now_seconds(), &self.secret)?;
        Ok(BundleCandidate {
            bundle,
            asset_count: assets.len(),
            event_count: events.len(),
        })
    }

    /// Commits the candidate: proves it on-chain, renames the stub claim to
    /// the real bundle id and stamps the proof. An upload failure commits the
    /// bundle locally without proof and yields `None`; the retry sweep picks
    /// it up later.
    pub async fn finalise_bundling(
        &self,
        candidate: &BundleCandidate,
        sequence_number: u64,
        storage_periods: u64,
    ) -> anyhow::Result<Option<Bundle>> {
        let stub_id = self.stub_id(sequence_number);
        let bundle = &candidate.bundle;

        let proof = self
            .uploads
            .upload_bundle(&bundle.bundle_id, storage_periods)
            .await
            .inspect_err(|e| tracing::error!(bundle_id = %bundle.bundle_id, "Bundle upload failed: {e:?}"))
            .ok();

        self.repository
            .store_bundle(bundle)
            .await
            .context("Failed to store bundle record")?;
        self.repository
            .end_bundle(&stub_id, &bundle.bundle_id)
            .await
            .context("Failed to commit bundle claim")?;

        match proof {
            Some(proof) => {
                self.repository
                    .store_bundle_proof_metadata(
                        &bundle.bundle_id,
                        proof.proof_block,
                        &proof.transaction_hash,
                    )
                    .await
                    .context("Failed to store bundle proof metadata")?;
                let stored = self
                    .repository
                    .get_bundle(&bundle.bundle_id)
                    .await?
                    .context("Bundle disappeared right after being stored")?;
                Ok(Some(stored))
            }
            None => Ok(None),
        }
    }

    /// Drops the claim made under this sequence number.
    pub async fn cancel_bundling(&self, sequence_number: u64) -> anyhow::Result<()> {
        let stub_id = self.stub_id(sequence_number);
        self.repository
            .discard_bundling(&stub_id)
            .await
            .context("Failed to discard bundle claim")?;
        Ok(())
    }

    /// Re-submits every bundle that exists locally without an on-chain
    /// proof. Individual failures are logged and left for the next window.
    pub async fn upload_not_registered_bundles(&self) -> anyhow::Result<Vec<Bundle>> {
        let pending = self.repository.find_bundles_without_proof().await?;
        let mut uploaded = Vec::new();
        for bundle in pending {
            let result = self
                .uploads
                .upload_bundle(&bundle.bundle_id, self.default_storage_periods)
                .await;
            match result {
                Ok(proof) => {
                    self.repository
                        .store_bundle_proof_metadata(
                            &bundle.bundle_id,
                            proof.proof_block,
                            &proof.transaction_hash,
                        )
                        .await?;
                    tracing::info!(bundle_id = %bundle.bundle_id, "Re-uploaded bundle");
                    uploaded.push(bundle);
                }
                Err(e) => {
                    tracing::warn!(bundle_id = %bundle.bundle_id, "Bundle re-upload failed: {e:?}");
                }
            }
        }
        Ok(uploaded)
    }

    // --- sheltering ---

    /// Fetches a peer's bundle, checks it against the bundle invariants and
    /// persists it for sheltering.
    pub async fn download_bundle(
        &self,
        bundle_id: &str,
        shelterer_id: &str,
    ) -> anyhow::Result<Bundle> {
        let shelterer_url = self
            .challenges
            .shelterer_url(shelterer_id)
            .await
            .context("Failed to resolve shelterer url")?;
        let bundle = self
            .downloader
            .download_bundle(&shelterer_url, bundle_id)
            .await?;

        if bundle.bundle_id != bundle_id {
            anyhow::bail!(
                "Shelterer served bundle {} instead of {}",
                bundle.bundle_id,
                bundle_id
            );
        }
        self.validator
            .validate_bundle(&bundle)
            .context("Downloaded bundle failed validation")?;

        if self.repository.get_bundle(bundle_id).await?.is_none() {
            self.repository.store_bundle(&bundle).await?;
        }
        Ok(bundle)
    }

    pub async fn update_sheltering_expiration_date(&self, bundle_id: &str) -> anyhow::Result<()> {
        self.challenges
            .update_sheltering_expiration_date(bundle_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenges::Challenge;
    use crate::store::memory::MemoryDatastore;
    use crate::uploads::BundleProof;
    use alloy::primitives::U256;
    use ambrosus_node_shared::crypto;
    use ambrosus_node_shared::validation::EntityBuilder;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    const SECRET: &str = "0x4646464646464646464646464646464646464646464646464646464646464646";

    #[derive(Default)]
    struct MockUploads {
        fail: AtomicBool,
        uploads: Mutex<Vec<(String, u64)>>,
    }

    impl UploadRepository for MockUploads {
        async fn check_if_enough_funds_for_upload(&self, _periods: u64) -> anyhow::Result<bool> {
            Ok(true)
        }

        async fn bundle_items_count_limit(&self) -> anyhow::Result<u64> {
            Ok(100)
        }

        async fn get_upload_fee(&self, _periods: u64) -> anyhow::Result<U256> {
            Ok(U256::ZERO)
        }

        async fn upload_bundle(
            &self,
            bundle_id: &str,
            storage_periods: u64,
        ) -> anyhow::Result<BundleProof> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("upload rejected");
            }
            self.uploads
                .lock()
                .unwrap()
                .push((bundle_id.to_owned(), storage_periods));
            Ok(BundleProof {
                proof_block: 10,
                transaction_hash: "0x123".to_owned(),
            })
        }
    }

    struct MockChallenges;

    impl ChallengesRepository for MockChallenges {
        async fn ongoing_challenges(&self) -> anyhow::Result<Vec<Challenge>> {
            Ok(vec![])
        }

        async fn resolve_challenge(&self, _challenge_id: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn shelterer_url(&self, _shelterer_id: &str) -> anyhow::Result<String> {
            Ok("https://peer.example.com".to_owned())
        }

        async fn update_sheltering_expiration_date(&self, _bundle_id: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockDownloader {
        bundle: Mutex<Option<Bundle>>,
    }

    impl BundleDownloader for MockDownloader {
        async fn download_bundle(
            &self,
            _shelterer_url: &str,
            _bundle_id: &str,
        ) -> anyhow::Result<Bundle> {
            self.bundle
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| anyhow::anyhow!("no bundle scripted"))
        }
    }

    type TestEngine = DataModelEngine<MemoryDatastore, MockUploads, MockChallenges, MockDownloader>;

    fn test_engine() -> (TestEngine, Arc<MockUploads>) {
        let uploads = Arc::new(MockUploads::default());
        let engine = DataModelEngine::new(
            EntityValidator::default(),
            EntityRepository::new(Arc::new(MemoryDatastore::new())),
            Arc::clone(&uploads),
            Arc::new(MockChallenges),
            MockDownloader::default(),
            crypto::decode_secret(SECRET).unwrap(),
            1,
        );
        (engine, uploads)
    }

    fn entity_builder() -> EntityBuilder {
        EntityBuilder::new(crypto::decode_secret(SECRET).unwrap())
    }

    fn info_data() -> Vec<Value> {
        vec![json!({"type": "ambrosus.asset.info", "name": "pallet 4"})]
    }

    #[tokio::test]
    async fn asset_ingress_roundtrip() {
        let (engine, _) = test_engine();
        let asset = entity_builder().build_asset(now_seconds(), 0).unwrap();

        let created = engine
            .create_asset(&serde_json::to_value(&asset).unwrap())
            .await
            .unwrap();
        assert_eq!(created, asset);
        assert_eq!(engine.get_asset(&asset.asset_id).await.unwrap(), Some(asset));
    }

    #[tokio::test]
    async fn tampered_asset_is_rejected_at_ingress() {
        let (engine, _) = test_engine();
        let mut raw = serde_json::to_value(
            entity_builder().build_asset(now_seconds(), 0).unwrap(),
        )
        .unwrap();
        raw["assetId"] = json!("0xffff");

        let err = engine.create_asset(&raw).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::HashMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn event_ingress_stamps_upload_timestamp() {
        let (engine, _) = test_engine();
        let event = entity_builder()
            .build_event("0xa55e7", now_seconds(), 0, info_data())
            .unwrap();

        let created = engine
            .create_event(&serde_json::to_value(&event).unwrap())
            .await
            .unwrap();
        assert!(created.metadata.entity_upload_timestamp.is_some());

        let read_back = engine.get_event(&event.event_id, 0).await.unwrap().unwrap();
        assert_eq!(read_back, created);
    }

    #[tokio::test]
    async fn bundling_happy_path_commits_and_proves() {
        let (engine, uploads) = test_engine();
        let builder = entity_builder();
        let asset = builder.build_asset(now_seconds(), 0).unwrap();
        engine
            .create_asset(&serde_json::to_value(&asset).unwrap())
            .await
            .unwrap();
        let event = builder
            .build_event(&asset.asset_id, now_seconds(), 0, info_data())
            .unwrap();
        engine
            .create_event(&serde_json::to_value(&event).unwrap())
            .await
            .unwrap();

        let candidate = engine.initialise_bundling(0, 100).await.unwrap();
        assert_eq!(candidate.entry_count(), 2);

        let finalised = engine.finalise_bundling(&candidate, 0, 4).await.unwrap().unwrap();
        assert_eq!(finalised.metadata.proof_block, Some(10));
        assert_eq!(
            finalised.metadata.bundle_transaction_hash.as_deref(),
            Some("0x123")
        );
        assert_eq!(uploads.uploads.lock().unwrap().len(), 1);

        let committed_asset = engine.get_asset(&asset.asset_id).await.unwrap().unwrap();
        assert_eq!(
            committed_asset.metadata.bundle_id.as_deref(),
            Some(finalised.bundle_id.as_str())
        );
        assert_eq!(
            committed_asset.metadata.bundle_transaction_hash.as_deref(),
            Some("0x123")
        );

        // Everything is claimed now.
        let empty = engine.initialise_bundling(1, 100).await.unwrap();
        assert_eq!(empty.entry_count(), 0);
    }

    #[tokio::test]
    async fn upload_failure_leaves_bundle_for_retry_sweep() {
        let (engine, uploads) = test_engine();
        let asset = entity_builder().build_asset(now_seconds(), 0).unwrap();
        engine
            .create_asset(&serde_json::to_value(&asset).unwrap())
            .await
            .unwrap();

        uploads.fail.store(true, Ordering::SeqCst);
        let candidate = engine.initialise_bundling(0, 100).await.unwrap();
        let finalised = engine.finalise_bundling(&candidate, 0, 4).await.unwrap();
        assert!(finalised.is_none());

        // The bundle is committed locally without a proof.
        let stored = engine
            .get_bundle(&candidate.bundle.bundle_id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.metadata.bundle_transaction_hash.is_none());

        uploads.fail.store(false, Ordering::SeqCst);
        let uploaded = engine.upload_not_registered_bundles().await.unwrap();
        assert_eq!(uploaded.len(), 1);

        let proved = engine
            .get_bundle(&candidate.bundle.bundle_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(proved.metadata.proof_block, Some(10));
        assert!(engine.upload_not_registered_bundles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_claim_is_reclaimable() {
        let (engine, _) = test_engine();
        let asset = entity_builder().build_asset(now_seconds(), 0).unwrap();
        engine
            .create_asset(&serde_json::to_value(&asset).unwrap())
            .await
            .unwrap();

        let candidate = engine.initialise_bundling(0, 100).await.unwrap();
        assert_eq!(candidate.entry_count(), 1);
        engine.cancel_bundling(0).await.unwrap();

        let reclaimed = engine.initialise_bundling(1, 100).await.unwrap();
        assert_eq!(reclaimed.entry_count(), 1);
    }

    #[tokio::test]
    async fn claim_is_trimmed_to_item_limit() {
        let (engine, _) = test_engine();
        let builder = entity_builder();
        for i in 0..3u64 {
            let asset = builder.build_asset(now_seconds(), i).unwrap();
            engine
                .create_asset(&serde_json::to_value(&asset).unwrap())
                .await
                .unwrap();
        }

        let candidate = engine.initialise_bundling(0, 2).await.unwrap();
        assert_eq!(candidate.entry_count(), 2);

        let remainder = engine.initialise_bundling(1, 2).await.unwrap();
        assert_eq!(remainder.entry_count(), 1);
    }

    #[tokio::test]
    async fn downloaded_bundle_is_validated_and_stored() {
        let (engine, _) = test_engine();
        let builder = entity_builder();
        let asset = builder.build_asset(now_seconds(), 0).unwrap();
        let secret = crypto::decode_secret(SECRET).unwrap();
        let bundle =
            validation::assemble_bundle(&[asset], &[], now_seconds(), &secret).unwrap();

        *engine.downloader.bundle.lock().unwrap() = Some(bundle.clone());

        let downloaded = engine
            .download_bundle(&bundle.bundle_id, "0x742e62cc7a19ef7d9c44306c07fad54b5bf6d4be")
            .await
            .unwrap();
        assert_eq!(downloaded, bundle);
        assert_eq!(
            engine.get_bundle(&bundle.bundle_id).await.unwrap(),
            Some(bundle)
        );
    }

    #[tokio::test]
    async fn mismatched_bundle_id_is_rejected() {
        let (engine, _) = test_engine();
        let secret = crypto::decode_secret(SECRET).unwrap();
        let bundle = validation::assemble_bundle(&[], &[], now_seconds(), &secret).unwrap();
        *engine.downloader.bundle.lock().unwrap() = Some(bundle);

        let err = engine
            .download_bundle("0xsomethingelse", "0x742e62cc7a19ef7d9c44306c07fad54b5bf6d4be")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("instead of"));
    }
}

