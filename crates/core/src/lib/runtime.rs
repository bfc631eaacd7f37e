use crate::bundle_download::ReqwestBundleDownloader;
use crate::chain::{ChainStatusClient, DefaultProvider, ProviderError, ProviderFactory};
use crate::challenges::OnChainChallengesRepository;
use crate::engine::DataModelEngine;
use crate::env::EnvVarValue;
use crate::failed_challenges::FailedChallengesCache;
use crate::prometheus_metrics::Metrics;
use crate::repository::EntityRepository;
use crate::store::memory::MemoryDatastore;
use crate::tracing::LogFormat;
use crate::uploads::OnChainUploadRepository;
use crate::worker_logs::WorkerLogRepository;
use crate::workers::challenge::ChallengeWorker;
use crate::workers::strategies::{AcceptAllChallengeStrategy, RegularUploadStrategy};
use crate::workers::upload::UploadWorker;
use crate::workers::{run_periodic, WorkerLogger};
use alloy::primitives::Address;
use alloy::transports::http::reqwest::Url;
use ambrosus_node_shared::crypto::{self, CryptoError};
use ambrosus_node_shared::validation::{EntityValidator, DEFAULT_TIMESTAMP_LIMIT};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;

const DEFAULT_PROMETHEUS_NAMESPACE: &str = "ambrosus_node";
const DEFAULT_STORAGE_PERIODS: u64 = 1;
const DEFAULT_UPLOAD_INTERVAL_SECONDS: u64 = 600;
const DEFAULT_UPLOAD_RETRY_PERIOD: u64 = 12;
const DEFAULT_CHALLENGE_INTERVAL_SECONDS: u64 = 30;
const DEFAULT_CHALLENGE_RETRY_TIMEOUT: u64 = 600;
const DEFAULT_CHAIN_SYNC_POLL_SECONDS: u64 = 5;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read env var {0:?}")]
    FailedToReadEnvVar(#[from] std::env::VarError),

    #[error("Failed to create execution layer provider: {0:?}")]
    ProviderError(#[from] ProviderError),

    #[error("Failed to decode node private key: {0:?}")]
    BadPrivateKey(#[from] CryptoError),
}

#[derive(Debug, Clone)]
pub struct EnvVars {
    pub log_format: EnvVarValue<LogFormat>,
    pub service_bind_to_addr: EnvVarValue<String>,
    pub execution_layer_rpc: EnvVarValue<Url>,
    pub private_key: EnvVarValue<String>,
    pub bundle_registry_address: EnvVarValue<Address>,
    pub challenges_address: EnvVarValue<Address>,
    pub node_registry_address: EnvVarValue<Address>,
    pub timestamp_limit: EnvVarValue<u64>,
    pub default_storage_periods: EnvVarValue<u64>,
    pub upload_worker_interval: EnvVarValue<u64>,
    pub upload_retry_period: EnvVarValue<u64>,
    pub challenge_worker_interval: EnvVarValue<u64>,
    pub challenge_retry_timeout: EnvVarValue<u64>,
    pub chain_sync_poll_seconds: EnvVarValue<u64>,
    pub prometheus_namespace: EnvVarValue<String>,
}

impl EnvVars {
    pub fn init_from_env_or_crash() -> Self {
        Self {
            log_format: crate::env::LOG_FORMAT.default(LogFormat::Plain),
            service_bind_to_addr: crate::env::SERVICE_BIND_TO_ADDR
                .default("0.0.0.0:9876".to_owned()),
            execution_layer_rpc: crate::env::EXECUTION_LAYER_RPC.required(),
            private_key: crate::env::PRIVATE_KEY.required(),
            bundle_registry_address: crate::env::BUNDLE_REGISTRY_ADDRESS.required(),
            challenges_address: crate::env::CHALLENGES_ADDRESS.required(),
            node_registry_address: crate::env::NODE_REGISTRY_ADDRESS.required(),
            timestamp_limit: crate::env::TIMESTAMP_LIMIT.default(DEFAULT_TIMESTAMP_LIMIT),
            default_storage_periods: crate::env::DEFAULT_STORAGE_PERIODS
                .default(DEFAULT_STORAGE_PERIODS),
            upload_worker_interval: crate::env::UPLOAD_WORKER_INTERVAL
                .default(DEFAULT_UPLOAD_INTERVAL_SECONDS),
            upload_retry_period: crate::env::UPLOAD_RETRY_PERIOD.default(DEFAULT_UPLOAD_RETRY_PERIOD),
            challenge_worker_interval: crate::env::CHALLENGE_WORKER_INTERVAL
                .default(DEFAULT_CHALLENGE_INTERVAL_SECONDS),
            challenge_retry_timeout: crate::env::CHALLENGE_RETRY_TIMEOUT
                .default(DEFAULT_CHALLENGE_RETRY_TIMEOUT),
            chain_sync_poll_seconds: crate::env::CHAIN_SYNC_POLL_SECONDS
                .default(DEFAULT_CHAIN_SYNC_POLL_SECONDS),
            prometheus_namespace: crate::env::PROMETHEUS_NAMESPACE
                .default(DEFAULT_PROMETHEUS_NAMESPACE.to_owned()),
        }
    }

    pub fn for_logging(&self, only_important: bool) -> HashMap<&'static str, String> {
        let mut result = HashMap::new();

        result.insert("log_format", format!("{:?}", self.log_format.value));
        result.insert(
            "bundle_registry_address",
            format!("{:?}", self.bundle_registry_address.value),
        );
        result.insert(
            "challenges_address",
            format!("{:?}", self.challenges_address.value),
        );
        result.insert(
            "node_registry_address",
            format!("{:?}", self.node_registry_address.value),
        );

        if !only_important {
            result.insert("service_bind_to_addr", self.service_bind_to_addr.value.clone());
            result.insert("execution_layer_rpc", "<sensitive>".to_string());
            result.insert("private_key", "<sensitive>".to_string());
            result.insert("timestamp_limit", self.timestamp_limit.value.to_string());
            result.insert(
                "default_storage_periods",
                self.default_storage_periods.value.to_string(),
            );
            result.insert(
                "upload_worker_interval",
                self.upload_worker_interval.value.to_string(),
            );
            result.insert("upload_retry_period", self.upload_retry_period.value.to_string());
            result.insert(
                "challenge_worker_interval",
                self.challenge_worker_interval.value.to_string(),
            );
            result.insert(
                "challenge_retry_timeout",
                self.challenge_retry_timeout.value.to_string(),
            );
            result.insert(
                "chain_sync_poll_seconds",
                self.chain_sync_poll_seconds.value.to_string(),
            );
            result.insert(
                "prometheus_namespace",
                self.prometheus_namespace.value.clone(),
            );
        }
        result
    }
}

pub struct NodeSettings {
    pub node_address: Address,
    pub upload_retry_period: u64,
    pub upload_interval: Duration,
    pub challenge_interval: Duration,
    pub challenge_retry_timeout: u64,
    pub default_storage_periods: u64,
    pub chain_sync_poll: Duration,
}

pub struct EthInfrastructure {
    pub provider: Arc<DefaultProvider>,
    pub chain_status: ChainStatusClient<DefaultProvider>,
}

pub struct RegistryInfrastructure {
    pub uploads: Arc<OnChainUploadRepository<DefaultProvider>>,
    pub challenges: Arc<OnChainChallengesRepository<DefaultProvider>>,
}

pub type DefaultDatastore = MemoryDatastore;
pub type DefaultEngine = DataModelEngine<
    DefaultDatastore,
    OnChainUploadRepository<DefaultProvider>,
    OnChainChallengesRepository<DefaultProvider>,
    ReqwestBundleDownloader,
>;

/// Everything a running node needs, wired once at startup.
pub struct NodeRuntime {
    pub eth_infra: EthInfrastructure,
    pub registry_infra: RegistryInfrastructure,
    pub settings: NodeSettings,
    pub store: Arc<DefaultDatastore>,
    pub engine: Arc<DefaultEngine>,
    pub worker_logs: Arc<WorkerLogRepository<DefaultDatastore>>,
    pub metrics: Arc<Metrics>,
}

impl NodeRuntime {
    pub fn init(env_vars: &EnvVars) -> Result<Self, Error> {
        let provider = Arc::new(ProviderFactory::create_provider_decode_key(
            &env_vars.private_key.value,
            env_vars.execution_layer_rpc.value.clone(),
        )?);

        let secret = crypto::decode_secret(&env_vars.private_key.value)?;
        let node_address = crypto::address_from_secret(&secret);

        let uploads = Arc::new(OnChainUploadRepository::new(
            Arc::clone(&provider),
            env_vars.bundle_registry_address.value,
            node_address,
        ));
        let challenges = Arc::new(OnChainChallengesRepository::new(
            Arc::clone(&provider),
            env_vars.challenges_address.value,
            env_vars.node_registry_address.value,
        ));

        let store = Arc::new(MemoryDatastore::new());
        let engine = Arc::new(DataModelEngine::new(
            EntityValidator::new(env_vars.timestamp_limit.value),
            EntityRepository::new(Arc::clone(&store)),
            Arc::clone(&uploads),
            Arc::clone(&challenges),
            ReqwestBundleDownloader::new(),
            secret,
            env_vars.default_storage_periods.value,
        ));

        let metrics = Arc::new(Metrics::new(&env_vars.prometheus_namespace.value));
        let worker_logs = Arc::new(WorkerLogRepository::new(Arc::clone(&store)));

        Ok(Self {
            eth_infra: EthInfrastructure {
                provider: Arc::clone(&provider),
                chain_status: ChainStatusClient::new(provider),
            },
            registry_infra: RegistryInfrastructure { uploads, challenges },
            settings: NodeSettings {
                node_address,
                upload_retry_period: env_vars.upload_retry_period.value,
                upload_interval: Duration::from_secs(env_vars.upload_worker_interval.value),
                challenge_interval: Duration::from_secs(env_vars.challenge_worker_interval.value),
                challenge_retry_timeout: env_vars.challenge_retry_timeout.value,
                default_storage_periods: env_vars.default_storage_periods.value,
                chain_sync_poll: Duration::from_secs(env_vars.chain_sync_poll_seconds.value),
            },
            store,
            engine,
            worker_logs,
            metrics,
        })
    }

    /// Spawns the upload and challenge workers. They stop cooperatively when
    /// `true` is sent on the shutdown channel (or the sender is dropped).
    pub fn spawn_workers(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let upload_worker = UploadWorker::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.registry_infra.uploads),
            RegularUploadStrategy {
                interval: self.settings.upload_interval,
                storage_periods: self.settings.default_storage_periods,
            },
            WorkerLogger::new("upload", Arc::clone(&self.worker_logs)),
            Arc::clone(&self.metrics.upload),
            self.settings.upload_retry_period,
        );

        let challenge_worker = ChallengeWorker::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.registry_infra.challenges),
            AcceptAllChallengeStrategy {
                interval: self.settings.challenge_interval,
                retry_timeout: self.settings.challenge_retry_timeout,
            },
            FailedChallengesCache::new(),
            WorkerLogger::new("challenge", Arc::clone(&self.worker_logs)),
            Arc::clone(&self.metrics.challenge),
        );

        vec![
            tokio::spawn(run_periodic(upload_worker, shutdown.clone())),
            tokio::spawn(run_periodic(challenge_worker, shutdown)),
        ]
    }
}
