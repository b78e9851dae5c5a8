//! Read access to the indexed state.
//!
//! [`ReadApi`] serves closed positions of a user with stable keyset
//! pagination: rows are ordered by `(closed_at DESC, id DESC)` and each page
//! carries an opaque [`PageCursor`] pointing past its last row, so rows
//! inserted while paging never shift or duplicate already served ones.
//!
//! Reads only touch the storage read pool and the chain's viewer, they never
//! wait on a running sync pass.

mod cursor;
mod enrich;
pub mod routes;

use std::{str::FromStr, sync::Arc};

use alloy::primitives::Address;
use serde::Serialize;

use crate::{
    chain::{ChainRegistry, LogSource},
    error::ApiError,
    state::Position,
    store::Store,
    viewer::Viewer,
};

pub use cursor::PageCursor;
pub use enrich::{DisplayAmounts, EnrichedPosition, VaultDetails};

pub const DEFAULT_PAGE_LIMIT: usize = 20;
pub const MAX_PAGE_LIMIT: usize = 100;

/// Page of results with the cursor of the next page, if any.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// Clamps the requested page size to `[1, MAX_PAGE_LIMIT]`.
pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT)
}

fn parse_address(value: &str) -> Result<Address, ApiError> {
    Address::from_str(value.trim()).map_err(|_| ApiError::InvalidAddress(value.to_string()))
}

#[derive(derive_more::Debug)]
pub struct ReadApi<V, L> {
    #[debug(skip)]
    registry: Arc<ChainRegistry<V, L>>,
    store: Store,
}

impl<V, L> Clone for ReadApi<V, L> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            store: self.store.clone(),
        }
    }
}

impl<V: Viewer, L: LogSource> ReadApi<V, L> {
    pub fn new(registry: Arc<ChainRegistry<V, L>>, store: Store) -> Self {
        Self { registry, store }
    }

    /// Closed positions of `user` on the chain, most recently closed first.
    ///
    /// `user` is accepted in any letter case. `cursor` is the `next_cursor`
    /// of the previous page.
    pub async fn closed_positions(
        &self,
        chain_id: u64,
        user: &str,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<Page<Position>, ApiError> {
        let user = parse_address(user)?;
        if self.registry.get(chain_id).is_none() {
            return Err(ApiError::UnknownChain(chain_id));
        }
        let limit = clamp_limit(limit);
        let after = cursor.map(PageCursor::decode).transpose()?;

        // One extra row tells whether another page follows
        let mut items = self
            .store
            .closed_positions(chain_id, user, after.map(|c| (c.closed_at, c.id)), limit + 1)
            .await?;
        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items
                .last()
                .and_then(|p| Some(PageCursor::new(p.closed_at()?, p.id()).encode()))
        } else {
            None
        };
        Ok(Page { items, next_cursor })
    }

    /// Same as [`Self::closed_positions`], with every position joined with
    /// live vault data.
    ///
    /// # Returns
    ///
    /// [`ApiError::EnrichmentUnavailable`] if live data can not be fetched,
    /// partial results are never returned.
    pub async fn closed_positions_enriched(
        &self,
        chain_id: u64,
        user: &str,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<Page<EnrichedPosition>, ApiError> {
        let page = self.closed_positions(chain_id, user, limit, cursor).await?;
        let runtime = self
            .registry
            .get(chain_id)
            .ok_or(ApiError::UnknownChain(chain_id))?;
        let stored = self.store.vaults(chain_id).await?;
        let items = enrich::enrich(chain_id, runtime.viewer(), &stored, page.items).await?;
        Ok(Page {
            items,
            next_cursor: page.next_cursor,
        })
    }
}
