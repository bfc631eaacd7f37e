use alloy::primitives::U256;
use ambrosus_node_core::bundle_download::BundleDownloader;
use ambrosus_node_core::challenges::{Challenge, ChallengesRepository};
use ambrosus_node_core::engine::DataModelEngine;
use ambrosus_node_core::prometheus_metrics::Metrics;
use ambrosus_node_core::repository::EntityRepository;
use ambrosus_node_core::store::memory::MemoryDatastore;
use ambrosus_node_core::uploads::{BundleProof, UploadRepository};
use ambrosus_node_core::worker_logs::WorkerLogRepository;
use ambrosus_node_shared::crypto;
use ambrosus_node_shared::entities::Bundle;
use ambrosus_node_shared::validation::{EntityBuilder, EntityValidator};
use chrono::Utc;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

pub const SECRET: &str = "0x4646464646464646464646464646464646464646464646464646464646464646";
pub const SHELTERER: &str = "0x742e62cc7a19ef7d9c44306c07fad54b5bf6d4be";

pub fn now() -> u64 {
    Utc::now().timestamp() as u64
}

pub fn entity_builder() -> EntityBuilder {
    EntityBuilder::new(crypto::decode_secret(SECRET).unwrap())
}

#[derive(Default)]
pub struct ScriptedUploads {
    pub fail_upload: AtomicBool,
    pub uploads: Mutex<Vec<(String, u64)>>,
}

impl UploadRepository for ScriptedUploads {
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
        if self.fail_upload.load(std::sync::atomic::Ordering::SeqCst) {
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

#[derive(Default)]
pub struct ScriptedChallenges {
    pub feed: Mutex<Vec<Challenge>>,
    pub resolved: Mutex<Vec<String>>,
    pub expirations: Mutex<Vec<String>>,
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

/// Downloads bundles straight out of a peer node's store, standing in for
/// the HTTP bundle endpoint.
pub struct PeerDownloader {
    peer: Option<Arc<MemoryDatastore>>,
}

impl BundleDownloader for PeerDownloader {
    async fn download_bundle(&self, _url: &str, bundle_id: &str) -> anyhow::Result<Bundle> {
        let Some(peer) = &self.peer else {
            anyhow::bail!("this node has no peer configured");
        };
        let repository = EntityRepository::new(Arc::clone(peer));
        repository
            .get_bundle(bundle_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("peer does not shelter bundle {bundle_id}"))
    }
}

pub type TestEngine =
    DataModelEngine<MemoryDatastore, ScriptedUploads, ScriptedChallenges, PeerDownloader>;

pub struct TestNode {
    pub store: Arc<MemoryDatastore>,
    pub engine: Arc<TestEngine>,
    pub uploads: Arc<ScriptedUploads>,
    pub challenges: Arc<ScriptedChallenges>,
    pub worker_logs: Arc<WorkerLogRepository<MemoryDatastore>>,
    pub metrics: Metrics,
}

/// A node wired against scripted chain adapters; `peer` makes another node's
/// store reachable for bundle downloads.
pub fn test_node(peer: Option<Arc<MemoryDatastore>>) -> TestNode {
    let store = Arc::new(MemoryDatastore::new());
    let uploads = Arc::new(ScriptedUploads::default());
    let challenges = Arc::new(ScriptedChallenges::default());
    let engine = Arc::new(DataModelEngine::new(
        EntityValidator::default(),
        EntityRepository::new(Arc::clone(&store)),
        Arc::clone(&uploads),
        Arc::clone(&challenges),
        PeerDownloader { peer },
        crypto::decode_secret(SECRET).unwrap(),
        1,
    ));
    let worker_logs = Arc::new(WorkerLogRepository::new(Arc::clone(&store)));
    let metrics = Metrics::new("node_flow_test");
    TestNode {
        store,
        engine,
        uploads,
        challenges,
        worker_logs,
        metrics,
    }
}
