use std::collections::HashMap;

use alloy::primitives::Address;
use fastnum::UD256;
use itertools::Itertools;
use serde::Serialize;

use crate::{
    error::ApiError,
    num::{self, Converter},
    state::{Position, Vault},
    types,
    viewer::{VaultMetrics, Viewer},
};

/// Stored position joined with current vault metadata and live figures.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedPosition {
    #[serde(flatten)]
    pub position: Position,
    pub amounts: DisplayAmounts,
    pub vault_details: VaultDetails,
}

/// Position amounts scaled by the asset decimals.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayAmounts {
    #[serde(with = "types::display::option")]
    pub principal: Option<UD256>,
    #[serde(with = "types::display::option")]
    pub collateral: Option<UD256>,
    #[serde(with = "types::display::option")]
    pub repaid: Option<UD256>,
    #[serde(with = "types::display::option")]
    pub collateral_returned: Option<UD256>,
}

/// Current vault metadata and live figures.
///
/// Amounts are scaled by the asset decimals, rates and utilization are
/// fractions (0.05 is 5%).
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultDetails {
    #[serde(with = "types::display")]
    pub asset: Address,
    pub symbol: String,
    pub decimals: u8,
    #[serde(with = "types::display")]
    pub total_assets: UD256,
    #[serde(with = "types::display")]
    pub total_borrowed: UD256,
    #[serde(with = "types::display")]
    pub available_liquidity: UD256,
    #[serde(with = "types::display")]
    pub borrow_rate: UD256,
    #[serde(with = "types::display")]
    pub supply_rate: UD256,
    #[serde(with = "types::display")]
    pub utilization: UD256,
}

impl VaultDetails {
    fn new(asset: Address, symbol: String, decimals: u8, metrics: &VaultMetrics) -> Self {
        let amount = Converter::new(decimals);
        let rate = Converter::wad();
        let total_assets = amount.from_unsigned(metrics.total_assets);
        let total_borrowed = amount.from_unsigned(metrics.total_borrowed);
        Self {
            asset,
            symbol,
            decimals,
            total_assets,
            total_borrowed,
            available_liquidity: amount.from_unsigned(metrics.available_liquidity),
            borrow_rate: rate.from_unsigned(metrics.borrow_rate),
            supply_rate: rate.from_unsigned(metrics.supply_rate),
            utilization: num::ratio(total_borrowed, total_assets),
        }
    }
}

fn unavailable(chain_id: u64, reason: impl ToString) -> ApiError {
    ApiError::EnrichmentUnavailable {
        chain_id,
        reason: reason.to_string(),
    }
}

/// Joins positions of a single chain with live viewer data.
///
/// Metadata comes from the live listing, falling back to the `stored` vault
/// row for vaults the listing omits. Any viewer failure fails the whole call,
/// stored rows are never modified.
pub(crate) async fn enrich<V: Viewer>(
    chain_id: u64,
    viewer: &V,
    stored: &[Vault],
    positions: Vec<Position>,
) -> Result<Vec<EnrichedPosition>, ApiError> {
    let vaults = positions.iter().map(Position::vault).unique().collect::<Vec<_>>();
    if vaults.is_empty() {
        return Ok(vec![]);
    }

    let (listing, metrics) = futures::try_join!(viewer.list_vaults(), viewer.vault_metrics(&vaults))
        .map_err(|e| unavailable(chain_id, e))?;
    if metrics.len() != vaults.len() {
        return Err(unavailable(
            chain_id,
            format!("expected {} vault metrics, got {}", vaults.len(), metrics.len()),
        ));
    }

    let mut details = HashMap::with_capacity(vaults.len());
    for (vault, metrics) in vaults.iter().zip(&metrics) {
        let (asset, symbol, decimals) = match listing.iter().find(|d| d.address == *vault) {
            Some(d) => (d.asset, d.symbol.clone(), d.decimals),
            None => match stored.iter().find(|v| v.address() == *vault) {
                Some(v) => (v.asset(), v.symbol().to_string(), v.decimals()),
                None => return Err(unavailable(chain_id, format!("no metadata for vault {vault}"))),
            },
        };
        details.insert(*vault, VaultDetails::new(asset, symbol, decimals, metrics));
    }

    Ok(positions
        .into_iter()
        .filter_map(|position| {
            let vault_details = details.get(&position.vault())?.clone();
            let converter = Converter::new(vault_details.decimals);
            let scale = |v: Option<alloy::primitives::U256>| v.map(|v| converter.from_unsigned(v));
            Some(EnrichedPosition {
                amounts: DisplayAmounts {
                    principal: scale(position.principal()),
                    collateral: scale(position.collateral()),
                    repaid: scale(position.repaid()),
                    collateral_returned: scale(position.collateral_returned()),
                },
                vault_details,
                position,
            })
        })
        .collect())
}
