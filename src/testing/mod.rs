//! In-memory chain and test utilities.
//!
//! [`MockChain`] implements both [`Viewer`] and [`LogSource`], so the whole
//! sync and read pipeline can run against it without a node. Vault events are
//! pushed as properly ABI-encoded logs, block timestamps default to
//! [`BASE_TIMESTAMP`] plus the block number and are served only via
//! [`LogSource::block_timestamp`], like most RPC providers do.
//!
//! Failure toggles simulate endpoint outages, viewer reverts and per-vault
//! log request failures.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use alloy::{
    primitives::{Address, LogData, U256, keccak256},
    rpc::types::Log,
};
use alloy_sol_types::SolEvent;

use crate::{
    Chain,
    abi::vault::ILendingVault,
    chain::{ChainRegistry, ChainRuntime, LogSource},
    error::SyncError,
    state::PositionSide,
    types::LogPosition,
    viewer::{VaultDescriptor, VaultMetrics, Viewer},
};

/// Timestamp of block zero of every mock chain.
pub const BASE_TIMESTAMP: u64 = 1_700_000_000;

pub type MockRuntime = ChainRuntime<MockChain, MockChain>;
pub type MockRegistry = ChainRegistry<MockChain, MockChain>;

#[derive(Clone, Debug)]
pub struct MockChain {
    chain_id: u64,
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, Default)]
struct MockState {
    head: u64,
    vaults: Vec<VaultDescriptor>,
    metrics: HashMap<Address, VaultMetrics>,
    logs: Vec<Log>,
    next_log_index: HashMap<u64, u64>,
    unavailable: bool,
    viewer_failing: bool,
    failing_vaults: HashSet<Address>,
    reverse_logs: bool,
    log_delay: Option<Duration>,
    timestamp_delay: Option<Duration>,
    log_requests: usize,
    timestamp_requests: usize,
    timestamps_in_flight: usize,
    peak_timestamps_in_flight: usize,
}

/// Vault descriptor with an asset address derived from the vault address.
pub fn vault(address: Address, symbol: &str, decimals: u8) -> VaultDescriptor {
    VaultDescriptor {
        address,
        asset: Address::from_slice(&keccak256(address)[12..]),
        symbol: symbol.to_string(),
        decimals,
    }
}

/// Deterministic test address, distinct per `n`.
pub fn address(n: u64) -> Address {
    let mut bytes = [0u8; 20];
    bytes[12..].copy_from_slice(&n.to_be_bytes());
    Address::from(bytes)
}

impl MockChain {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            state: Default::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Runtime with this mock acting as both viewer and log source.
    pub fn runtime(&self, start_block: u64) -> MockRuntime {
        ChainRuntime::new(
            Chain::new(
                self.chain_id,
                format!("mock-{}", self.chain_id),
                Address::ZERO,
                start_block,
                vec![],
            ),
            self.clone(),
            self.clone(),
        )
    }

    pub fn head(&self) -> u64 {
        self.state().head
    }

    pub fn set_head(&self, head: u64) {
        self.state().head = head;
    }

    /// Lists the vault in the viewer, replacing any previous listing of it.
    pub fn list_vault(&self, descriptor: VaultDescriptor) {
        let mut state = self.state();
        state.vaults.retain(|v| v.address != descriptor.address);
        state.vaults.push(descriptor);
    }

    /// Removes the vault from the viewer listing, its logs stay.
    pub fn unlist_vault(&self, address: Address) {
        self.state().vaults.retain(|v| v.address != address);
    }

    pub fn set_metrics(&self, vault: Address, metrics: VaultMetrics) {
        self.state().metrics.insert(vault, metrics);
    }

    /// Every call fails as if all endpoints were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Viewer calls revert.
    pub fn set_viewer_failing(&self, failing: bool) {
        self.state().viewer_failing = failing;
    }

    /// Log requests of the vault revert.
    pub fn set_vault_failing(&self, vault: Address, failing: bool) {
        let mut state = self.state();
        if failing {
            state.failing_vaults.insert(vault);
        } else {
            state.failing_vaults.remove(&vault);
        }
    }

    /// Serves logs in reverse order.
    pub fn set_reverse_logs(&self, reverse: bool) {
        self.state().reverse_logs = reverse;
    }

    /// Delays every log request.
    pub fn set_log_delay(&self, delay: Option<Duration>) {
        self.state().log_delay = delay;
    }

    /// Delays every block timestamp request.
    pub fn set_timestamp_delay(&self, delay: Option<Duration>) {
        self.state().timestamp_delay = delay;
    }

    pub fn log_requests(&self) -> usize {
        self.state().log_requests
    }

    pub fn timestamp_requests(&self) -> usize {
        self.state().timestamp_requests
    }

    /// Highest number of block timestamp requests observed in flight at once.
    pub fn peak_timestamps_in_flight(&self) -> usize {
        self.state().peak_timestamps_in_flight
    }

    /// Appends a log with the next free log index of the block.
    pub fn push_raw_log(&self, vault: Address, block: u64, data: LogData) -> LogPosition {
        let mut state = self.state();
        let log_index = {
            let next = state.next_log_index.entry(block).or_default();
            *next += 1;
            *next - 1
        };
        let tx_hash = keccak256(format!("{}:{block}:{log_index}", self.chain_id));
        state.logs.push(Log {
            inner: alloy::primitives::Log {
                address: vault,
                data,
            },
            block_number: Some(block),
            transaction_hash: Some(tx_hash),
            transaction_index: Some(0),
            log_index: Some(log_index),
            ..Default::default()
        });
        LogPosition::new(block, log_index)
    }

    /// Flags the log as removed by a reorganization.
    pub fn remove_log(&self, position: LogPosition) {
        for log in self.state().logs.iter_mut() {
            if log.block_number == Some(position.block_number)
                && log.log_index == Some(position.log_index)
            {
                log.removed = true;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn push_activation(
        &self,
        vault: Address,
        block: u64,
        user: Address,
        position_id: u64,
        side: PositionSide,
        principal: u64,
        collateral: u64,
    ) -> LogPosition {
        let data = ILendingVault::PositionActivated {
            user,
            positionId: U256::from(position_id),
            strategyId: U256::from(1),
            side: side as u8,
            principal: U256::from(principal),
            collateral: U256::from(collateral),
        }
        .encode_log_data();
        self.push_raw_log(vault, block, data)
    }

    pub fn push_repay(
        &self,
        vault: Address,
        block: u64,
        user: Address,
        position_id: u64,
        repaid: u64,
        collateral_returned: u64,
    ) -> LogPosition {
        let data = ILendingVault::PositionRepaid {
            user,
            positionId: U256::from(position_id),
            repaid: U256::from(repaid),
            collateralReturned: U256::from(collateral_returned),
        }
        .encode_log_data();
        self.push_raw_log(vault, block, data)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn push_liquidation(
        &self,
        vault: Address,
        block: u64,
        user: Address,
        position_id: u64,
        liquidator: Address,
        debt_covered: u64,
        collateral_seized: u64,
    ) -> LogPosition {
        let data = ILendingVault::PositionLiquidated {
            user,
            positionId: U256::from(position_id),
            liquidator,
            debtCovered: U256::from(debt_covered),
            collateralSeized: U256::from(collateral_seized),
        }
        .encode_log_data();
        self.push_raw_log(vault, block, data)
    }

    fn check_available(&self) -> Result<(), SyncError> {
        if self.state().unavailable {
            return Err(SyncError::ChainUnavailable {
                chain_id: self.chain_id,
                attempts: 1,
                last: "mock endpoint down".to_string(),
            });
        }
        Ok(())
    }

    fn check_viewer(&self) -> Result<(), SyncError> {
        self.check_available()?;
        if self.state().viewer_failing {
            return Err(SyncError::ChainRead {
                chain_id: self.chain_id,
                reason: "call reverted: viewer paused".to_string(),
            });
        }
        Ok(())
    }
}

impl Viewer for MockChain {
    async fn list_vaults(&self) -> Result<Vec<VaultDescriptor>, SyncError> {
        self.check_viewer()?;
        Ok(self.state().vaults.clone())
    }

    async fn vault_metrics(&self, vaults: &[Address]) -> Result<Vec<VaultMetrics>, SyncError> {
        self.check_viewer()?;
        let state = self.state();
        Ok(vaults
            .iter()
            .map(|v| state.metrics.get(v).copied().unwrap_or_default())
            .collect())
    }
}

impl LogSource for MockChain {
    async fn head_block(&self) -> Result<u64, SyncError> {
        self.check_available()?;
        Ok(self.head())
    }

    async fn vault_logs(&self, vault: Address, from: u64, to: u64) -> Result<Vec<Log>, SyncError> {
        self.check_available()?;
        let (delay, result) = {
            let mut state = self.state();
            state.log_requests += 1;
            let result = if state.failing_vaults.contains(&vault) {
                Err(SyncError::ChainRead {
                    chain_id: self.chain_id,
                    reason: format!("call reverted: logs of {vault} unavailable"),
                })
            } else {
                let mut logs = state
                    .logs
                    .iter()
                    .filter(|l| {
                        l.inner.address == vault
                            && l.block_number.is_some_and(|b| b >= from && b <= to)
                    })
                    .cloned()
                    .collect::<Vec<_>>();
                if state.reverse_logs {
                    logs.reverse();
                }
                Ok(logs)
            };
            (state.log_delay, result)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64, SyncError> {
        self.check_available()?;
        let delay = {
            let mut state = self.state();
            state.timestamp_requests += 1;
            state.timestamps_in_flight += 1;
            state.peak_timestamps_in_flight = state
                .peak_timestamps_in_flight
                .max(state.timestamps_in_flight);
            state.timestamp_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state().timestamps_in_flight -= 1;
        Ok(BASE_TIMESTAMP + number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_chain_logs() {
        let chain = MockChain::new(1);
        let vault = address(1);
        let user = address(2);

        assert_eq!(
            chain.push_activation(vault, 10, user, 1, PositionSide::Lender, 100, 0),
            LogPosition::new(10, 0)
        );
        assert_eq!(
            chain.push_repay(vault, 10, user, 1, 100, 0),
            LogPosition::new(10, 1)
        );
        chain.push_repay(address(3), 11, user, 2, 100, 0);

        let logs = chain.vault_logs(vault, 0, 100).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(chain.vault_logs(vault, 11, 100).await.unwrap().is_empty());
        assert_eq!(chain.log_requests(), 2);

        chain.set_unavailable(true);
        assert!(matches!(
            chain.head_block().await,
            Err(SyncError::ChainUnavailable { chain_id: 1, .. })
        ));
    }
}
