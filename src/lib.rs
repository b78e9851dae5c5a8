//! Lending protocol indexer.
//!
//! # Overview
//!
//! Keeps a relational snapshot of on-chain lending protocol state (vaults,
//! lender/borrower positions and their lifecycle events) for one or more
//! EVM chains, and serves cursor-paginated reads of it.
//!
//! Use [`chain::ChainRegistry`] to bind every configured [`Chain`] to its RPC
//! endpoint pool and viewer contract, then [`sync::Syncer::run_pass`] to bring
//! the [`store::Store`] up to date with the chain heads. Each pass discovers
//! vaults through the protocol viewer, scans every vault's logs from its
//! persisted watermark and commits the resulting position transitions together
//! with the new watermark.
//!
//! [`api::ReadApi`] serves stored positions, optionally enriched with live
//! viewer data, and [`api::routes::router`] exposes it over HTTP.
//!
//! # Limitations/follow-ups
//!
//! * Chain reorganizations are not handled beyond skipping logs flagged as
//!   removed. Scanning up to a confirmation depth below the head would be the
//!   natural follow-up.
//!
//! * Vaults are never deactivated automatically, absence from a viewer listing
//!   is not treated as removal.
//!
//! # Testing
//!
//! [`testing`] module provides an in-memory chain implementing both the viewer
//! and the log source, so the whole sync pipeline can run without a node.

pub mod abi;
pub mod api;
pub mod chain;
pub mod error;
pub mod num;
pub mod rpc;
pub mod state;
pub mod store;
pub mod sync;
pub mod testing;
pub mod types;
pub mod viewer;

use alloy::primitives::Address;
use url::Url;

#[derive(Clone, Debug)]
/// Chain the protocol is deployed on.
pub struct Chain {
    chain_id: u64,
    name: String,
    viewer: Address,
    start_block: u64,
    endpoints: Vec<Url>,
}

impl Chain {
    pub fn new(
        chain_id: u64,
        name: impl Into<String>,
        viewer: Address,
        start_block: u64,
        endpoints: Vec<Url>,
    ) -> Self {
        Self {
            chain_id,
            name: name.into(),
            viewer,
            start_block,
            endpoints,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address of the protocol viewer contract.
    pub fn viewer(&self) -> Address {
        self.viewer
    }

    /// First block to scan for vaults without a persisted watermark.
    pub fn start_block(&self) -> u64 {
        self.start_block
    }

    /// RPC endpoints in fallback order.
    pub fn endpoints(&self) -> &[Url] {
        &self.endpoints
    }
}
