use alloy::primitives::Address;
use serde::Serialize;

use crate::types;

/// Vault as persisted by the indexer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Vault {
    chain_id: u64,
    #[serde(with = "types::display")]
    address: Address,
    #[serde(with = "types::display")]
    asset: Address,
    symbol: String,
    decimals: u8,
    active: bool,
    updated_at: u64,
}

impl Vault {
    pub(crate) fn new(
        chain_id: u64,
        address: Address,
        asset: Address,
        symbol: String,
        decimals: u8,
        active: bool,
        updated_at: u64,
    ) -> Self {
        Self {
            chain_id,
            address,
            asset,
            symbol,
            decimals,
            active,
            updated_at,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Token lent and borrowed in the vault.
    pub fn asset(&self) -> Address {
        self.asset
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Decimals of the asset token.
    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn active(&self) -> bool {
        self.active
    }

    /// Unix timestamp of the last change of the record.
    pub fn updated_at(&self) -> u64 {
        self.updated_at
    }
}
