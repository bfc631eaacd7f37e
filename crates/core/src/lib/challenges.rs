use crate::chain::ContractError;
use alloy::network::Ethereum;
use alloy::primitives::{Address, B256};
use alloy::providers::Provider;
use alloy::sol;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tracing::Instrument;

use NodeRegistry::NodeRegistryInstance;
use ShelteringChallenges::ShelteringChallengesInstance;

sol! {
    #[sol(rpc)]
    interface ShelteringChallenges {
        struct ChallengeData {
            bytes32 challengeId;
            address sheltererId;
            bytes32 bundleId;
            uint64 activeCount;
        }

        function getActiveChallenges() external view returns (ChallengeData[] memory);
        function resolveChallenge(bytes32 challengeId) external;
    }
}

sol! {
    #[sol(rpc)]
    interface NodeRegistry {
        function getNodeUrl(address node) external view returns (string memory);
        function extendShelteringExpiration(bytes32 bundleId) external;
    }
}

/// An on-chain request to prove this node can serve a peer's bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub challenge_id: String,
    pub shelterer_id: String,
    pub bundle_id: String,
    pub active_count: u64,
}

/// Thin adapter over the registry's challenge feed and resolution calls.
pub trait ChallengesRepository: Send + Sync {
    fn ongoing_challenges(&self) -> impl Future<Output = anyhow::Result<Vec<Challenge>>> + Send;

    fn resolve_challenge(
        &self,
        challenge_id: &str,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn shelterer_url(
        &self,
        shelterer_id: &str,
    ) -> impl Future<Output = anyhow::Result<String>> + Send;

    fn update_sheltering_expiration_date(
        &self,
        bundle_id: &str,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

pub struct OnChainChallengesRepository<P>
where
    P: Provider<Ethereum> + Clone,
{
    challenges: ShelteringChallengesInstance<Arc<P>>,
    registry: NodeRegistryInstance<Arc<P>>,
}

impl<P> OnChainChallengesRepository<P>
where
    P: Provider<Ethereum> + Clone,
{
    pub fn new(provider: Arc<P>, challenges_address: Address, registry_address: Address) -> Self {
        Self {
            challenges: ShelteringChallenges::new(challenges_address, Arc::clone(&provider)),
            registry: NodeRegistry::new(registry_address, Arc::clone(&provider)),
        }
    }

    fn parse_id(value: &str) -> Result<B256, ContractError> {
        B256::from_str(value).map_err(|_| ContractError::MalformedId(value.to_owned()))
    }

    async fn resolve_challenge_impl(&self, challenge_id: &str) -> Result<(), ContractError> {
        let id = Self::parse_id(challenge_id)?;
        let tx = self
            .challenges
            .resolveChallenge(id)
            .send()
            .instrument(tracing::info_span!("send_tx"))
            .await
            .inspect_err(|err| tracing::error!("Failed to submit resolution {err:?}"))?;

        let receipt = tx
            .get_receipt()
            .instrument(tracing::info_span!("get_receipt"))
            .await
            .inspect_err(|err| tracing::error!("Resolution transaction failed {err:?}"))?;
        if !receipt.status() {
            return Err(ContractError::Reverted(format!(
                "{:#?}",
                receipt.transaction_hash
            )));
        }
        Ok(())
    }
}

impl From<ShelteringChallenges::ChallengeData> for Challenge {
    fn from(data: ShelteringChallenges::ChallengeData) -> Self {
        Challenge {
            challenge_id: format!("{:#x}", data.challengeId),
            shelterer_id: data.sheltererId.to_checksum(None),
            bundle_id: format!("{:#x}", data.bundleId),
            active_count: data.activeCount,
        }
    }
}

impl<P> ChallengesRepository for OnChainChallengesRepository<P>
where
    P: Provider<Ethereum> + Clone + Send + Sync,
{
    async fn ongoing_challenges(&self) -> anyhow::Result<Vec<Challenge>> {
        let raw = self
            .challenges
            .getActiveChallenges()
            .call()
            .await
            .inspect_err(|err| tracing::error!("Failed to read challenge feed {err:?}"))
            .map_err(ContractError::from)?;
        Ok(raw.into_iter().map(Challenge::from).collect())
    }

    async fn resolve_challenge(&self, challenge_id: &str) -> anyhow::Result<()> {
        self.resolve_challenge_impl(challenge_id).await?;
        Ok(())
    }

    async fn shelterer_url(&self, shelterer_id: &str) -> anyhow::Result<String> {
        let address = Address::from_str(shelterer_id)
            .map_err(|_| ContractError::MalformedId(shelterer_id.to_owned()))?;
        let url = self
            .registry
            .getNodeUrl(address)
            .call()
            .await
            .map_err(ContractError::from)?;
        Ok(url)
    }

    async fn update_sheltering_expiration_date(&self, bundle_id: &str) -> anyhow::Result<()> {
        let id = Self::parse_id(bundle_id)?;
        let tx = self
            .registry
            .extendShelteringExpiration(id)
            .send()
            .await
            .map_err(ContractError::from)?;
        let receipt = tx.get_receipt().await?;
        if !receipt.status() {
            return Err(ContractError::Reverted(format!("{:#?}", receipt.transaction_hash)).into());
        }
        Ok(())
    }
}
