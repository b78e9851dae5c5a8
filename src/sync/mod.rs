//! Chain synchronization.
//!
//! A sync pass runs every configured chain concurrently. For each chain it
//! discovers vaults through the viewer, fetches the head block once, then
//! scans every active vault from its watermark up to the head with bounded
//! parallelism. Each scan window is committed atomically together with the
//! watermark advance, so an interrupted pass never leaves partial state.
//!
//! Concurrent passes are safe: a chain already being synced is skipped, and
//! per-vault locks guard every scan-apply-commit sequence.

mod discovery;
mod engine;
mod locks;

use std::{sync::Arc, time::Instant};

use alloy::primitives::Address;
use futures::{StreamExt, TryStreamExt, stream};
use tracing::{error, info};

use crate::{
    chain::{ChainRegistry, ChainRuntime, LogSource},
    error::SyncError,
    rpc::DEFAULT_CALL_TIMEOUT,
    store::{DEFAULT_TX_TIMEOUT, Store},
    viewer::Viewer,
};

pub use discovery::{Discovery, discover};
pub use locks::LockArena;

/// Default maximal number of blocks per `eth_getLogs` request.
pub const DEFAULT_MAX_BLOCK_RANGE: u64 = 2000;

/// Default number of vaults of a chain synced in parallel.
pub const DEFAULT_VAULT_CONCURRENCY: usize = 4;

/// Default number of block timestamp requests of a vault in flight.
pub const DEFAULT_TIMESTAMP_CONCURRENCY: usize = 8;

#[derive(Clone, Copy, Debug)]
pub struct SyncConfig {
    /// Maximal number of blocks scanned via single logs request.
    pub max_block_range: u64,
    /// Number of vaults of a chain synced in parallel.
    pub vault_concurrency: usize,
    /// Number of block timestamp requests of a vault in flight.
    pub timestamp_concurrency: usize,
    /// Bound of a single RPC call against a single endpoint.
    pub rpc_timeout: std::time::Duration,
    /// Bound of a single storage transaction.
    pub tx_timeout: std::time::Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_block_range: DEFAULT_MAX_BLOCK_RANGE,
            vault_concurrency: DEFAULT_VAULT_CONCURRENCY,
            timestamp_concurrency: DEFAULT_TIMESTAMP_CONCURRENCY,
            rpc_timeout: DEFAULT_CALL_TIMEOUT,
            tx_timeout: DEFAULT_TX_TIMEOUT,
        }
    }
}

/// Result of a single sync pass.
#[derive(Debug, Default)]
pub struct PassReport {
    pub chains: Vec<ChainReport>,
}

#[derive(Debug)]
pub struct ChainReport {
    pub chain_id: u64,
    pub outcome: ChainOutcome,
}

#[derive(Debug)]
pub enum ChainOutcome {
    /// Sync is disabled by configuration.
    Disabled,

    /// Another pass is syncing the chain.
    Skipped,

    /// Chain pass finished, individual vaults may still have failed.
    Completed {
        head: u64,
        discovery: Discovery,
        vaults: Vec<VaultReport>,
    },

    /// Chain pass aborted.
    Failed(SyncError),
}

#[derive(Debug)]
pub struct VaultReport {
    pub vault: Address,
    pub outcome: VaultOutcome,
}

#[derive(Debug)]
pub enum VaultOutcome {
    /// Another pass is syncing the vault.
    Busy,

    /// Nothing to scan, the watermark is at or past the head.
    UpToDate { watermark: Option<u64> },

    /// Blocks `[from, to]` scanned and committed.
    Advanced {
        from: u64,
        to: u64,
        events: usize,
        rows_written: usize,
    },

    /// Vault scan aborted, the watermark stays at the last committed window.
    Failed(SyncError),
}

impl PassReport {
    pub fn chain(&self, chain_id: u64) -> Option<&ChainReport> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }

    /// Total number of storage rows inserted or changed by the pass.
    pub fn rows_written(&self) -> usize {
        self.chains.iter().map(ChainReport::rows_written).sum()
    }

    /// Number of chains whose pass was aborted.
    pub fn failed_chains(&self) -> usize {
        self.chains
            .iter()
            .filter(|c| matches!(c.outcome, ChainOutcome::Failed(_)))
            .count()
    }

    /// Number of vaults whose scan was aborted.
    pub fn failed_vaults(&self) -> usize {
        self.chains
            .iter()
            .filter_map(|c| match &c.outcome {
                ChainOutcome::Completed { vaults, .. } => Some(vaults),
                _ => None,
            })
            .flatten()
            .filter(|v| matches!(v.outcome, VaultOutcome::Failed(_)))
            .count()
    }
}

impl ChainReport {
    pub fn rows_written(&self) -> usize {
        match &self.outcome {
            ChainOutcome::Completed {
                discovery, vaults, ..
            } => {
                discovery.rows_written
                    + vaults
                        .iter()
                        .map(|v| match v.outcome {
                            VaultOutcome::Advanced { rows_written, .. } => rows_written,
                            _ => 0,
                        })
                        .sum::<usize>()
            }
            _ => 0,
        }
    }

    pub fn vault(&self, vault: Address) -> Option<&VaultReport> {
        match &self.outcome {
            ChainOutcome::Completed { vaults, .. } => vaults.iter().find(|v| v.vault == vault),
            _ => None,
        }
    }
}

/// Sync trigger shared by all callers of a process.
#[derive(derive_more::Debug)]
pub struct Syncer<V, L> {
    #[debug(skip)]
    registry: Arc<ChainRegistry<V, L>>,
    store: Store,
    config: SyncConfig,
    enabled: bool,
    chain_locks: LockArena<u64>,
    vault_locks: LockArena<(u64, Address)>,
}

impl<V: Viewer, L: LogSource> Syncer<V, L> {
    pub fn new(
        registry: Arc<ChainRegistry<V, L>>,
        store: Store,
        config: SyncConfig,
        enabled: bool,
    ) -> Self {
        Self {
            registry,
            store,
            config,
            enabled,
            chain_locks: LockArena::new(),
            vault_locks: LockArena::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ChainRegistry<V, L>> {
        &self.registry
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Runs one sync pass over all configured chains.
    ///
    /// Never fails as a whole, per-chain and per-vault failures are recorded
    /// in the report.
    pub async fn run_pass(&self) -> PassReport {
        if !self.enabled {
            info!("Sync disabled, skipping pass");
            return PassReport {
                chains: self
                    .registry
                    .chain_ids()
                    .into_iter()
                    .map(|chain_id| ChainReport {
                        chain_id,
                        outcome: ChainOutcome::Disabled,
                    })
                    .collect(),
            };
        }

        let started = Instant::now();
        info!(chains = self.registry.len(), "Sync pass started");
        let chains =
            futures::future::join_all(self.registry.iter().map(|rt| self.sync_chain(rt))).await;
        let report = PassReport { chains };
        info!(
            rows_written = report.rows_written(),
            failed_chains = report.failed_chains(),
            failed_vaults = report.failed_vaults(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sync pass finished"
        );
        report
    }

    async fn sync_chain(&self, runtime: &ChainRuntime<V, L>) -> ChainReport {
        let chain_id = runtime.chain_id();
        let Some(_guard) = self.chain_locks.try_acquire(chain_id) else {
            info!(chain_id, "Chain sync already running, skipping");
            return ChainReport {
                chain_id,
                outcome: ChainOutcome::Skipped,
            };
        };

        let outcome = match self.sync_chain_locked(runtime).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(chain_id, chain = runtime.chain().name(), %err, "Chain sync failed");
                ChainOutcome::Failed(err)
            }
        };
        ChainReport { chain_id, outcome }
    }

    async fn sync_chain_locked(
        &self,
        runtime: &ChainRuntime<V, L>,
    ) -> Result<ChainOutcome, SyncError> {
        let chain_id = runtime.chain_id();
        let discovery = discover(runtime, &self.store).await?;
        let head = runtime.logs().head_block().await?;
        let targets = self.store.active_vaults(chain_id).await?;

        let mut vaults = stream::iter(targets)
            .map(|vault| {
                engine::sync_vault(
                    runtime,
                    &self.store,
                    &self.vault_locks,
                    vault,
                    head,
                    &self.config,
                )
            })
            .buffer_unordered(self.config.vault_concurrency.max(1))
            .try_collect::<Vec<_>>()
            .await?;
        vaults.sort_by_key(|v| v.vault);

        info!(
            chain_id,
            head,
            vaults = vaults.len(),
            listed = discovery.listed.len(),
            "Chain synced"
        );
        Ok(ChainOutcome::Completed {
            head,
            discovery,
            vaults,
        })
    }
}
