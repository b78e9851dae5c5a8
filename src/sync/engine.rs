use std::collections::HashMap;

use alloy::primitives::Address;
use futures::{StreamExt, TryStreamExt, stream};
use itertools::Itertools;
use tracing::{debug, warn};

use super::{LockArena, SyncConfig, VaultOutcome, VaultReport};
use crate::{
    chain::{ChainRuntime, LogSource},
    error::SyncError,
    state::{DecodedLog, VaultEvent},
    store::Store,
    types::EventContext,
    viewer::Viewer,
};

/// Inclusive block windows covering `[from, to]`, at most `max_range` blocks each.
pub(crate) fn scan_windows(from: u64, to: u64, max_range: u64) -> impl Iterator<Item = (u64, u64)> {
    let max_range = max_range.max(1);
    (from..=to)
        .step_by(max_range as usize)
        .map(move |start| (start, start.saturating_add(max_range - 1).min(to)))
}

/// Brings the vault's events up to `head`.
///
/// Vault-level failures are reported in the returned [`VaultReport`],
/// chain-level ones are returned as error to abort the chain pass.
pub(crate) async fn sync_vault<V: Viewer, L: LogSource>(
    runtime: &ChainRuntime<V, L>,
    store: &Store,
    locks: &LockArena<(u64, Address)>,
    vault: Address,
    head: u64,
    config: &SyncConfig,
) -> Result<VaultReport, SyncError> {
    let chain_id = runtime.chain_id();
    let Some(_guard) = locks.try_acquire((chain_id, vault)) else {
        debug!(chain_id, %vault, "Vault sync already running, skipping");
        return Ok(VaultReport {
            vault,
            outcome: VaultOutcome::Busy,
        });
    };

    let outcome = match scan(runtime, store, vault, head, config).await {
        Ok(outcome) => outcome,
        Err(err) if err.is_chain_level() => return Err(err),
        Err(err) => {
            warn!(chain_id, %vault, %err, "Vault sync failed");
            VaultOutcome::Failed(err)
        }
    };
    Ok(VaultReport { vault, outcome })
}

async fn scan<V: Viewer, L: LogSource>(
    runtime: &ChainRuntime<V, L>,
    store: &Store,
    vault: Address,
    head: u64,
    config: &SyncConfig,
) -> Result<VaultOutcome, SyncError> {
    let chain_id = runtime.chain_id();
    let watermark = store.watermark(chain_id, vault).await?;
    let from = watermark.map_or(runtime.chain().start_block(), |w| w + 1);
    if from > head {
        return Ok(VaultOutcome::UpToDate { watermark });
    }

    let mut events = 0;
    let mut rows_written = 0;
    for (window_from, window_to) in scan_windows(from, head, config.max_block_range) {
        let logs = runtime
            .logs()
            .vault_logs(vault, window_from, window_to)
            .await?;

        let mut decoded = Vec::with_capacity(logs.len());
        for log in logs.iter().filter(|l| !l.removed) {
            match DecodedLog::from_rpc(log) {
                Ok(d) if matches!(d.event, VaultEvent::Unknown(_)) => {}
                Ok(d) => decoded.push(d),
                Err(err) => warn!(
                    chain_id,
                    %vault,
                    block_number = ?log.block_number,
                    log_index = ?log.log_index,
                    %err,
                    "Skipping undecodable log"
                ),
            }
        }
        // Providers are not required to return logs in order
        decoded.sort_by_key(|d| d.position);

        let window =
            resolve_timestamps(runtime.logs(), decoded, config.timestamp_concurrency).await?;
        let window_events = window.len();
        let window_rows = store
            .commit_window(chain_id, vault, window_to, window)
            .await?;
        debug!(
            chain_id,
            %vault,
            from = window_from,
            to = window_to,
            events = window_events,
            rows_written = window_rows,
            "Committed scan window"
        );
        events += window_events;
        rows_written += window_rows;
    }

    Ok(VaultOutcome::Advanced {
        from,
        to: head,
        events,
        rows_written,
    })
}

/// Attaches block timestamps, fetching the ones logs do not carry once per
/// block, at most `concurrency` requests at a time.
async fn resolve_timestamps<L: LogSource>(
    logs: &L,
    decoded: Vec<DecodedLog>,
    concurrency: usize,
) -> Result<Vec<EventContext<VaultEvent>>, SyncError> {
    let missing = decoded
        .iter()
        .filter(|d| d.block_timestamp.is_none())
        .map(|d| d.position.block_number)
        .unique()
        .collect::<Vec<_>>();
    let fetched = stream::iter(missing.iter().copied())
        .map(|b| logs.block_timestamp(b))
        .buffered(concurrency.max(1))
        .try_collect::<Vec<_>>()
        .await?;
    let timestamps = missing.into_iter().zip(fetched).collect::<HashMap<_, _>>();

    Ok(decoded
        .into_iter()
        .map(|d| {
            let ts = d
                .block_timestamp
                .or_else(|| timestamps.get(&d.position.block_number).copied())
                .unwrap_or_default();
            d.with_timestamp(ts)
        })
        .collect())
}
