use alloy::primitives::Address;
use itertools::Itertools;
use tracing::debug;

use crate::{
    chain::{ChainRuntime, LogSource},
    error::SyncError,
    store::Store,
    viewer::Viewer,
};

/// Outcome of a vault discovery.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Vaults listed by the viewer, in listing order without duplicates.
    pub listed: Vec<Address>,
    /// Vault rows inserted or changed.
    pub rows_written: usize,
}

/// Upserts every vault the chain's viewer currently lists as active.
///
/// Vaults missing from the listing are left untouched.
pub async fn discover<V: Viewer, L: LogSource>(
    runtime: &ChainRuntime<V, L>,
    store: &Store,
) -> Result<Discovery, SyncError> {
    let chain_id = runtime.chain_id();
    let descriptors = runtime
        .viewer()
        .list_vaults()
        .await?
        .into_iter()
        .unique_by(|d| d.address)
        .collect::<Vec<_>>();
    let listed = descriptors.iter().map(|d| d.address).collect::<Vec<_>>();

    let rows_written = store.upsert_vaults(chain_id, descriptors).await?;
    debug!(
        chain_id,
        listed = listed.len(),
        rows_written,
        "Vault discovery finished"
    );
    Ok(Discovery {
        listed,
        rows_written,
    })
}
