use crate::chain::ContractError;
use alloy::network::Ethereum;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::Provider;
use alloy::sol;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tracing::Instrument;

use BundleRegistry::BundleRegistryInstance;

sol! {
    #[sol(rpc)]
    interface BundleRegistry {
        function storeBundle(bytes32 bundleId, uint64 storagePeriods) external payable;
        function getFeeForUpload(uint64 storagePeriods) external view returns (uint256);
        function bundleItemsCountLimit() external view returns (uint256);
    }
}

/// On-chain proof of a committed bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleProof {
    pub proof_block: u64,
    pub transaction_hash: String,
}

/// Thin adapter over the registry's upload surface: funds, fees, size limit
/// and the bundle proof transaction.
pub trait UploadRepository: Send + Sync {
    fn check_if_enough_funds_for_upload(
        &self,
        storage_periods: u64,
    ) -> impl Future<Output = anyhow::Result<bool>> + Send;

    fn bundle_items_count_limit(&self) -> impl Future<Output = anyhow::Result<u64>> + Send;

    fn get_upload_fee(
        &self,
        storage_periods: u64,
    ) -> impl Future<Output = anyhow::Result<U256>> + Send;

    fn upload_bundle(
        &self,
        bundle_id: &str,
        storage_periods: u64,
    ) -> impl Future<Output = anyhow::Result<BundleProof>> + Send;
}

pub struct OnChainUploadRepository<P>
where
    P: Provider<Ethereum> + Clone,
{
    contract: BundleRegistryInstance<Arc<P>>,
    provider: Arc<P>,
    node_address: Address,
}

impl<P> OnChainUploadRepository<P>
where
    P: Provider<Ethereum> + Clone,
{
    pub fn new(provider: Arc<P>, contract_address: Address, node_address: Address) -> Self {
        let contract = BundleRegistry::new(contract_address, Arc::clone(&provider));
        Self {
            contract,
            provider,
            node_address,
        }
    }

    fn parse_bundle_id(bundle_id: &str) -> Result<B256, ContractError> {
        B256::from_str(bundle_id).map_err(|_| ContractError::MalformedId(bundle_id.to_owned()))
    }

    async fn upload_bundle_impl(
        &self,
        bundle_id: &str,
        storage_periods: u64,
    ) -> Result<BundleProof, ContractError> {
        let id = Self::parse_bundle_id(bundle_id)?;
        let fee = self.contract.getFeeForUpload(storage_periods).call().await?;

        tracing::info!(bundle_id, storage_periods, "Submitting bundle proof transaction");
        let tx = self
            .contract
            .storeBundle(id, storage_periods)
            .value(fee)
            .send()
            .instrument(tracing::info_span!("send_tx"))
            .await
            .inspect(|val| tracing::debug!("Submitted transaction {}", val.tx_hash()))
            .inspect_err(|err| tracing::error!("Failed to submit transaction {err:?}"))?;

        let receipt = tx
            .get_receipt()
            .instrument(tracing::info_span!("get_receipt"))
            .await
            .inspect_err(|err| tracing::error!("Transaction failed {err:?}"))?;

        if !receipt.status() {
            tracing::error!("Transaction reverted {:#?}", receipt.transaction_hash);
            return Err(ContractError::Reverted(format!(
                "{:#?}",
                receipt.transaction_hash
            )));
        }

        Ok(BundleProof {
            proof_block: receipt.block_number.unwrap_or_default(),
            transaction_hash: format!("{:#x}", receipt.transaction_hash),
        })
    }
}

impl<P> UploadRepository for OnChainUploadRepository<P>
where
    P: Provider<Ethereum> + Clone + Send + Sync,
{
    async fn check_if_enough_funds_for_upload(&self, storage_periods: u64) -> anyhow::Result<bool> {
        let fee = self.get_upload_fee(storage_periods).await?;
        let balance = self
            .provider
            .get_balance(self.node_address)
            .await
            .map_err(ContractError::from)?;
        Ok(balance >= fee)
    }

    async fn bundle_items_count_limit(&self) -> anyhow::Result<u64> {
        let limit = self
            .contract
            .bundleItemsCountLimit()
            .call()
            .await
            .map_err(ContractError::from)?;
        Ok(limit.to::<u64>())
    }

    async fn get_upload_fee(&self, storage_periods: u64) -> anyhow::Result<U256> {
        let fee = self
            .contract
            .getFeeForUpload(storage_periods)
            .call()
            .await
            .map_err(ContractError::from)?;
        Ok(fee)
    }

    async fn upload_bundle(
        &self,
        bundle_id: &str,
        storage_periods: u64,
    ) -> anyhow::Result<BundleProof> {
        let proof = self.upload_bundle_impl(bundle_id, storage_periods).await?;
        Ok(proof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_id_must_be_a_32_byte_hash() {
        let valid = format!("0x{}", "ab".repeat(32));
        assert!(OnChainUploadRepository::<crate::chain::DefaultProvider>::parse_bundle_id(&valid).is_ok());

        let err = OnChainUploadRepository::<crate::chain::DefaultProvider>::parse_bundle_id("0x1234")
            .unwrap_err();
        assert!(matches!(err, ContractError::MalformedId(_)));
    }
}
