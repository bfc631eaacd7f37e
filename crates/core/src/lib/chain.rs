use alloy::network::{Ethereum, EthereumWallet};
use alloy::providers::fillers::RecommendedFillers;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::reqwest::Url;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Duration;

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("Contract rejected: {0}")]
    Rejection(String),

    #[error("Transaction reverted: {0}")]
    Reverted(String),

    #[error("Transaction error {0:#?}")]
    TransactionError(#[from] alloy::providers::PendingTransactionError),

    #[error("Other alloy error {0:#?}")]
    OtherAlloyError(alloy::contract::Error),

    #[error("Rpc error {0:#?}")]
    Rpc(#[from] alloy::transports::RpcError<alloy::transports::TransportErrorKind>),

    #[error("{0} is not a 32-byte hex value")]
    MalformedId(String),
}

impl From<alloy::contract::Error> for ContractError {
    fn from(error: alloy::contract::Error) -> Self {
        if let alloy::contract::Error::TransportError(alloy::transports::RpcError::ErrorResp(
            ref error_payload,
        )) = error
        {
            if error_payload.message.contains("execution reverted") {
                return ContractError::Rejection(error_payload.message.to_string());
            }
        }
        ContractError::OtherAlloyError(error)
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Failed to convert string to hex")]
    FromHexError,
    #[error("Failed to parse private key")]
    ParsePrivateKeyError,
    #[error("Failed to deserialize private key")]
    DeserializePrivateKeyError,
}

pub type DefaultProvider = alloy::providers::fillers::FillProvider<
    alloy::providers::fillers::JoinFill<
        alloy::providers::fillers::JoinFill<
            alloy::providers::Identity,
            <Ethereum as RecommendedFillers>::RecommendedFillers,
        >,
        alloy::providers::fillers::WalletFiller<EthereumWallet>,
    >,
    alloy::providers::RootProvider,
>;

pub struct ProviderFactory {}

impl ProviderFactory {
    fn decode_key(private_key_raw: &str) -> Result<k256::SecretKey, ProviderError> {
        let key_str = private_key_raw
            .split("0x")
            .last()
            .ok_or(ProviderError::ParsePrivateKeyError)?
            .trim();
        let key_hex = hex::decode(key_str).map_err(|_e| ProviderError::FromHexError)?;
        let key = k256::SecretKey::from_bytes((&key_hex[..]).into())
            .map_err(|_e| ProviderError::DeserializePrivateKeyError)?;
        Ok(key)
    }

    pub fn create_provider(key: k256::SecretKey, endpoint: Url) -> DefaultProvider {
        let signer: PrivateKeySigner = PrivateKeySigner::from(key);
        let wallet: EthereumWallet = EthereumWallet::from(signer);
        ProviderBuilder::new().wallet(wallet).connect_http(endpoint)
    }

    pub fn create_provider_decode_key(
        key_str: &str,
        endpoint: Url,
    ) -> Result<DefaultProvider, ProviderError> {
        let key = Self::decode_key(key_str)?;
        Ok(Self::create_provider(key, endpoint))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    InSync,
    Syncing { current_block: u64, highest_block: u64 },
}

impl SyncStatus {
    pub fn is_synced(&self) -> bool {
        match self {
            SyncStatus::InSync => true,
            SyncStatus::Syncing {
                current_block,
                highest_block,
            } => current_block >= highest_block,
        }
    }
}

/// Sync-state view of the blockchain client.
pub trait SyncState {
    fn syncing(&self) -> impl Future<Output = anyhow::Result<SyncStatus>> + Send;
}

/// Polls the client once per interval until the chain reports itself in
/// sync. `on_poll` fires once per poll that still observes syncing, so it is
/// never invoked when the chain is already synced on the first poll.
pub async fn wait_for_chain_sync<C, F>(
    client: &C,
    poll_interval: Duration,
    mut on_poll: F,
) -> anyhow::Result<()>
where
    C: SyncState + Sync,
    F: FnMut(SyncStatus) + Send,
{
    loop {
        let status = client.syncing().await?;
        if status.is_synced() {
            return Ok(());
        }
        tracing::info!(status = ?status, "Chain is still syncing");
        on_poll(status);
        tokio::time::sleep(poll_interval).await;
    }
}

/// `eth_syncing` view over an alloy provider.
pub struct ChainStatusClient<P>
where
    P: Provider<Ethereum>,
{
    provider: Arc<P>,
}

impl<P> ChainStatusClient<P>
where
    P: Provider<Ethereum>,
{
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }
}

impl<P> SyncState for ChainStatusClient<P>
where
    P: Provider<Ethereum> + Send + Sync,
{
    async fn syncing(&self) -> anyhow::Result<SyncStatus> {
        let status = self.provider.syncing().await?;
        let mapped = match status {
            alloy::rpc::types::SyncStatus::None => SyncStatus::InSync,
            alloy::rpc::types::SyncStatus::Info(info) => SyncStatus::Syncing {
                current_block: info.current_block.to::<u64>(),
                highest_block: info.highest_block.to::<u64>(),
            },
        };
        Ok(mapped)
    }
}
