//! Per-chain runtime bindings.
//!
//! [`ChainRegistry`] is built once at startup and handed by reference to every
//! component needing chain access, keeping exactly one [`ChainRuntime`] (and
//! thus one viewer and one endpoint pool) per configured chain.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use alloy::{
    eips::BlockId,
    primitives::Address,
    providers::Provider,
    rpc::types::{Filter, Log},
};

use crate::{
    Chain,
    error::{EndpointError, SyncError},
    rpc::RpcPool,
    viewer::{OnChainViewer, Viewer},
};

/// Source of vault logs and chain head information.
pub trait LogSource: Send + Sync {
    /// Current head block number.
    fn head_block(&self) -> impl Future<Output = Result<u64, SyncError>> + Send;

    /// Logs emitted by `vault` within `[from, to]` (inclusive).
    fn vault_logs(
        &self,
        vault: Address,
        from: u64,
        to: u64,
    ) -> impl Future<Output = Result<Vec<Log>, SyncError>> + Send;

    /// Timestamp of the given block.
    fn block_timestamp(&self, number: u64) -> impl Future<Output = Result<u64, SyncError>> + Send;
}

impl LogSource for RpcPool {
    async fn head_block(&self) -> Result<u64, SyncError> {
        self.block_number().await
    }

    async fn vault_logs(&self, vault: Address, from: u64, to: u64) -> Result<Vec<Log>, SyncError> {
        let filter = Filter::new().address(vault).from_block(from).to_block(to);
        self.call(|provider| {
            let filter = filter.clone();
            async move { provider.get_logs(&filter).await.map_err(EndpointError::from) }
        })
        .await
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64, SyncError> {
        self.call(|provider| async move {
            // Lagging nodes answer with null for blocks they have not seen yet,
            // which counts as an endpoint fault
            provider
                .get_block(BlockId::number(number))
                .await
                .map_err(EndpointError::from)?
                .map(|b| b.into_header().timestamp)
                .ok_or(EndpointError::NullResp)
        })
        .await
    }
}

/// One chain's registry entry bound to its viewer and log source.
#[derive(Debug)]
pub struct ChainRuntime<V, L> {
    chain: Chain,
    viewer: V,
    logs: L,
}

impl<V: Viewer, L: LogSource> ChainRuntime<V, L> {
    pub fn new(chain: Chain, viewer: V, logs: L) -> Self {
        Self {
            chain,
            viewer,
            logs,
        }
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn chain_id(&self) -> u64 {
        self.chain.chain_id()
    }

    pub fn viewer(&self) -> &V {
        &self.viewer
    }

    pub fn logs(&self) -> &L {
        &self.logs
    }
}

/// Runtime backed by the deployed viewer contract and real RPC endpoints.
pub type RpcRuntime = ChainRuntime<OnChainViewer, RpcPool>;

/// Explicit set of chain runtimes, keyed by chain ID.
#[derive(Debug)]
pub struct ChainRegistry<V, L> {
    runtimes: BTreeMap<u64, Arc<ChainRuntime<V, L>>>,
}

impl<V: Viewer, L: LogSource> ChainRegistry<V, L> {
    pub fn new(runtimes: impl IntoIterator<Item = ChainRuntime<V, L>>) -> Self {
        Self {
            runtimes: runtimes
                .into_iter()
                .map(|rt| (rt.chain_id(), Arc::new(rt)))
                .collect(),
        }
    }

    pub fn get(&self, chain_id: u64) -> Option<&Arc<ChainRuntime<V, L>>> {
        self.runtimes.get(&chain_id)
    }

    /// Runtimes in ascending chain ID order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ChainRuntime<V, L>>> {
        self.runtimes.values()
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        self.runtimes.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.runtimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
    }
}

impl ChainRegistry<OnChainViewer, RpcPool> {
    /// Connects every chain to its endpoints, sharing one pool between the
    /// chain's viewer and log source.
    pub fn connect(chains: Vec<Chain>, call_timeout: Duration) -> Self {
        Self::new(chains.into_iter().map(|chain| {
            let pool = RpcPool::connect(chain.chain_id(), chain.endpoints(), call_timeout);
            let viewer = OnChainViewer::new(chain.viewer(), pool.clone());
            ChainRuntime::new(chain, viewer, pool)
        }))
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;
    use url::Url;

    use super::*;

    #[test]
    fn test_registry_connect() {
        let chains = vec![
            Chain::new(
                10,
                "optimism",
                address!("0x00000000000000000000000000000000000000a1"),
                100,
                vec![Url::parse("https://rpc-a.example.org/key").unwrap()],
            ),
            Chain::new(
                1,
                "mainnet",
                address!("0x00000000000000000000000000000000000000a2"),
                200,
                vec![
                    Url::parse("https://rpc-b.example.org").unwrap(),
                    Url::parse("https://rpc-c.example.org").unwrap(),
                ],
            ),
        ];
        let registry = ChainRegistry::connect(chains, Duration::from_secs(1));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.chain_ids(), vec![1, 10]);

        let mainnet = registry.get(1).unwrap();
        assert_eq!(mainnet.chain().start_block(), 200);
        assert_eq!(
            mainnet.viewer().address(),
            address!("0x00000000000000000000000000000000000000a2")
        );
        let labels = mainnet
            .logs()
            .endpoints()
            .iter()
            .map(|e| e.label().to_string())
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["rpc-b.example.org", "rpc-c.example.org"]);

        assert!(registry.get(5).is_none());
    }
}
