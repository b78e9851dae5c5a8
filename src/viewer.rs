//! Read-only facade over the protocol viewer contract.

use alloy::{
    primitives::{Address, U256},
    providers::Provider,
};

use crate::{
    abi::viewer::IVaultViewer,
    error::{EndpointError, SyncError},
    rpc::RpcPool,
};

/// Default number of vault metrics to fetch via single multicall.
const DEFAULT_METRICS_PER_BATCH: usize = 200;

/// Vault as reported by the protocol viewer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VaultDescriptor {
    pub address: Address,
    pub asset: Address,
    pub symbol: String,
    pub decimals: u8,
}

/// Live figures of a vault computed from current contract state.
///
/// Amounts are in asset base units, rates are WAD-scaled (18 decimals).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VaultMetrics {
    pub total_assets: U256,
    pub total_borrowed: U256,
    pub available_liquidity: U256,
    pub borrow_rate: U256,
    pub supply_rate: U256,
}

/// Answers "what vaults exist" and "what are their current figures".
pub trait Viewer: Send + Sync {
    /// Current set of vaults registered in the protocol.
    fn list_vaults(&self) -> impl Future<Output = Result<Vec<VaultDescriptor>, SyncError>> + Send;

    /// Current metrics of the given vaults, in the same order.
    fn vault_metrics(
        &self,
        vaults: &[Address],
    ) -> impl Future<Output = Result<Vec<VaultMetrics>, SyncError>> + Send;
}

impl From<IVaultViewer::VaultInfo> for VaultDescriptor {
    fn from(info: IVaultViewer::VaultInfo) -> Self {
        Self {
            address: info.vault,
            asset: info.asset,
            symbol: info.symbol,
            decimals: info.decimals,
        }
    }
}

impl From<IVaultViewer::VaultMetrics> for VaultMetrics {
    fn from(m: IVaultViewer::VaultMetrics) -> Self {
        Self {
            total_assets: m.totalAssets,
            total_borrowed: m.totalBorrowed,
            available_liquidity: m.availableLiquidity,
            borrow_rate: m.borrowRate,
            supply_rate: m.supplyRate,
        }
    }
}

/// [`Viewer`] reading the deployed viewer contract through an [`RpcPool`].
#[derive(Clone, Debug)]
pub struct OnChainViewer {
    address: Address,
    pool: RpcPool,
    metrics_per_batch: usize,
}

impl OnChainViewer {
    pub fn new(address: Address, pool: RpcPool) -> Self {
        Self {
            address,
            pool,
            metrics_per_batch: DEFAULT_METRICS_PER_BATCH,
        }
    }

    /// Sets the number of metrics calls aggregated into a single multicall (default: 200).
    /// Use if default does not fit node/provider gas and response size limits.
    pub fn with_metrics_per_batch(mut self, metrics_per_batch: usize) -> Self {
        self.metrics_per_batch = metrics_per_batch.max(1);
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

impl Viewer for OnChainViewer {
    async fn list_vaults(&self) -> Result<Vec<VaultDescriptor>, SyncError> {
        let address = self.address;
        let vaults = self
            .pool
            .call(|provider| async move {
                IVaultViewer::new(address, provider)
                    .getVaults()
                    .call()
                    .await
                    .map_err(EndpointError::from)
            })
            .await?;
        Ok(vaults.into_iter().map(VaultDescriptor::from).collect())
    }

    async fn vault_metrics(&self, vaults: &[Address]) -> Result<Vec<VaultMetrics>, SyncError> {
        let address = self.address;
        let batch_futs = vaults.chunks(self.metrics_per_batch).map(|chunk| {
            self.pool.call(move |provider| async move {
                let viewer = IVaultViewer::new(address, provider.clone());
                provider
                    .multicall()
                    .dynamic()
                    .extend(chunk.iter().map(|vault| viewer.getVaultMetrics(*vault)))
                    .aggregate()
                    .await
                    .map_err(EndpointError::from)
            })
        });

        Ok(futures::future::try_join_all(batch_futs)
            .await?
            .into_iter()
            .flatten()
            .map(VaultMetrics::from)
            .collect())
    }
}
