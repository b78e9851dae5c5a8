use alloy::primitives::{Address, TxHash, U256};
use rusqlite::{OptionalExtension, Transaction, params};

use super::{
    Store, address_from_row, b256_from_row, enum_from_row, opt_u256_from_row, u256_from_row,
    unix_now,
};
use crate::{
    error::StoreError,
    state::{Activation, CloseReason, Closing, Closure, Opening, Position, PositionSide, VaultEvent},
    types::{BlockInstant, EventContext},
};

const POSITION_COLUMNS: &str = "id, chain_id, vault, user, position_id, side, strategy_id, principal, \
     collateral, opened_block, opened_at, close_reason, repaid, collateral_returned, closed_block, \
     closed_at";

fn row_to_position(row: &rusqlite::Row<'_>) -> rusqlite::Result<Position> {
    let chain_id: i64 = row.get(1)?;
    let vault: Vec<u8> = row.get(2)?;
    let user: Vec<u8> = row.get(3)?;
    let position_id: String = row.get(4)?;
    let side: Option<String> = row.get(5)?;
    let opened_block: Option<i64> = row.get(9)?;
    let opened_at: Option<i64> = row.get(10)?;
    let close_reason: Option<String> = row.get(11)?;
    let closed_block: Option<i64> = row.get(14)?;
    let closed_at: Option<i64> = row.get(15)?;

    let opening = match (side, opened_block, opened_at) {
        (Some(side), Some(block), Some(ts)) => Some(Opening {
            side: enum_from_row(&side, 5, PositionSide::parse)?,
            strategy_id: opt_u256_from_row(row.get(6)?, 6)?.unwrap_or_default(),
            principal: opt_u256_from_row(row.get(7)?, 7)?.unwrap_or_default(),
            collateral: opt_u256_from_row(row.get(8)?, 8)?.unwrap_or_default(),
            instant: BlockInstant::new(block as u64, ts as u64),
        }),
        _ => None,
    };
    let closing = match (close_reason, closed_block, closed_at) {
        (Some(reason), Some(block), Some(ts)) => Some(Closing {
            reason: enum_from_row(&reason, 11, CloseReason::parse)?,
            repaid: opt_u256_from_row(row.get(12)?, 12)?.unwrap_or_default(),
            collateral_returned: opt_u256_from_row(row.get(13)?, 13)?.unwrap_or_default(),
            instant: BlockInstant::new(block as u64, ts as u64),
        }),
        _ => None,
    };

    Ok(Position::new(
        row.get(0)?,
        chain_id as u64,
        address_from_row(&vault, 2)?,
        address_from_row(&user, 3)?,
        u256_from_row(&position_id, 4)?,
        opening,
        closing,
    ))
}

/// Persisted vault event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    pub tx_hash: TxHash,
    pub log_index: u64,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub kind: String,
    pub args: serde_json::Value,
}

fn insert_event(
    tx: &Transaction<'_>,
    chain_id: u64,
    vault: Address,
    ctx: &EventContext<VaultEvent>,
) -> Result<usize, StoreError> {
    let args = serde_json::to_string(&ctx.event().args())
        .map_err(|e| StoreError::Sqlite(format!("event args serialization: {e}")))?;
    Ok(tx
        .prepare_cached(
            "INSERT OR IGNORE INTO vault_events
                 (chain_id, tx_hash, log_index, vault, block_number, block_timestamp, kind, args)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?
        .execute(params![
            chain_id as i64,
            ctx.tx_hash().as_slice(),
            ctx.log_index() as i64,
            vault.as_slice(),
            ctx.instant().block_number() as i64,
            ctx.instant().block_timestamp() as i64,
            ctx.event().kind(),
            args,
        ])?)
}

/// Records opening details. Existing opening details are kept and closed
/// positions stay closed.
fn apply_activation(
    tx: &Transaction<'_>,
    chain_id: u64,
    vault: Address,
    instant: BlockInstant,
    a: &Activation,
) -> Result<usize, StoreError> {
    Ok(tx
        .prepare_cached(
            "INSERT INTO positions
                 (chain_id, vault, user, position_id, side, strategy_id, principal, collateral,
                  opened_block, opened_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'open')
             ON CONFLICT (chain_id, vault, user, position_id) DO UPDATE SET
                 side = excluded.side,
                 strategy_id = excluded.strategy_id,
                 principal = excluded.principal,
                 collateral = excluded.collateral,
                 opened_block = excluded.opened_block,
                 opened_at = excluded.opened_at
             WHERE positions.opened_block IS NULL",
        )?
        .execute(params![
            chain_id as i64,
            vault.as_slice(),
            a.user.as_slice(),
            a.position_id.to_string(),
            a.side.as_str(),
            a.strategy_id.to_string(),
            a.principal.to_string(),
            a.collateral.to_string(),
            instant.block_number() as i64,
            instant.block_timestamp() as i64,
        ])?)
}

/// Marks the position closed, creating the row if its activation was never
/// observed. The first recorded closure wins.
fn apply_closure(
    tx: &Transaction<'_>,
    chain_id: u64,
    vault: Address,
    instant: BlockInstant,
    c: &Closure,
) -> Result<usize, StoreError> {
    Ok(tx
        .prepare_cached(
            "INSERT INTO positions
                 (chain_id, vault, user, position_id, status, close_reason, repaid,
                  collateral_returned, closed_block, closed_at)
             VALUES (?1, ?2, ?3, ?4, 'closed', ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (chain_id, vault, user, position_id) DO UPDATE SET
                 status = 'closed',
                 close_reason = excluded.close_reason,
                 repaid = excluded.repaid,
                 collateral_returned = excluded.collateral_returned,
                 closed_block = excluded.closed_block,
                 closed_at = excluded.closed_at
             WHERE positions.closed_block IS NULL",
        )?
        .execute(params![
            chain_id as i64,
            vault.as_slice(),
            c.user.as_slice(),
            c.position_id.to_string(),
            c.reason.as_str(),
            c.repaid.to_string(),
            c.collateral_returned.to_string(),
            instant.block_number() as i64,
            instant.block_timestamp() as i64,
        ])?)
}

/// Raises the watermark, never lowers it.
fn advance_watermark(
    tx: &Transaction<'_>,
    chain_id: u64,
    vault: Address,
    to_block: u64,
) -> Result<usize, StoreError> {
    Ok(tx.execute(
        "INSERT INTO sync_cursors (chain_id, vault, last_block, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (chain_id, vault) DO UPDATE SET
             last_block = excluded.last_block,
             updated_at = excluded.updated_at
         WHERE excluded.last_block > sync_cursors.last_block",
        params![chain_id as i64, vault.as_slice(), to_block as i64, unix_now()],
    )?)
}

impl Store {
    /// Last block scanned for the vault, if any.
    ///
    /// Read on the writer connection so the value reflects every commit
    /// serialized before it.
    pub async fn watermark(&self, chain_id: u64, vault: Address) -> Result<Option<u64>, StoreError> {
        self.with_writer(move |conn| {
            let last_block: Option<i64> = conn
                .query_row(
                    "SELECT last_block FROM sync_cursors WHERE chain_id = ?1 AND vault = ?2",
                    params![chain_id as i64, vault.as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(last_block.map(|b| b as u64))
        })
        .await
    }

    /// Commits the events of a scanned window together with the watermark
    /// advance to `to_block`, all or nothing.
    ///
    /// Events have to be in application order. Unknown events are skipped.
    ///
    /// # Returns
    ///
    /// Number of rows inserted or changed, zero when the window had already
    /// been committed.
    pub async fn commit_window(
        &self,
        chain_id: u64,
        vault: Address,
        to_block: u64,
        events: Vec<EventContext<VaultEvent>>,
    ) -> Result<usize, StoreError> {
        self.with_writer(move |conn| {
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            let mut written = 0;
            for ctx in &events {
                let applied = match ctx.event() {
                    VaultEvent::Activated(a) => {
                        apply_activation(&tx, chain_id, vault, ctx.instant(), a)?
                    }
                    VaultEvent::Closed(c) => apply_closure(&tx, chain_id, vault, ctx.instant(), c)?,
                    VaultEvent::Unknown(_) => continue,
                };
                written += applied + insert_event(&tx, chain_id, vault, ctx)?;
            }
            written += advance_watermark(&tx, chain_id, vault, to_block)?;
            tx.commit()?;
            Ok(written)
        })
        .await
    }

    /// Closed positions of the user on the chain, most recently closed first.
    ///
    /// `after` is the `(closed_at, id)` key of the last row of the previous
    /// page, only rows strictly past it are returned.
    pub async fn closed_positions(
        &self,
        chain_id: u64,
        user: Address,
        after: Option<(u64, i64)>,
        limit: usize,
    ) -> Result<Vec<Position>, StoreError> {
        self.with_reader(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {POSITION_COLUMNS} FROM positions
                 WHERE chain_id = ?1 AND user = ?2 AND status = 'closed'
                   AND (?3 IS NULL OR closed_at < ?3 OR (closed_at = ?3 AND id < ?4))
                 ORDER BY closed_at DESC, id DESC
                 LIMIT ?5"
            ))?;
            let positions = stmt
                .query_map(
                    params![
                        chain_id as i64,
                        user.as_slice(),
                        after.map(|(closed_at, _)| closed_at as i64),
                        after.map(|(_, id)| id),
                        limit as i64,
                    ],
                    row_to_position,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(positions)
        })
        .await
    }

    pub async fn position(
        &self,
        chain_id: u64,
        vault: Address,
        user: Address,
        position_id: U256,
    ) -> Result<Option<Position>, StoreError> {
        self.with_reader(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {POSITION_COLUMNS} FROM positions
                         WHERE chain_id = ?1 AND vault = ?2 AND user = ?3 AND position_id = ?4"
                    ),
                    params![
                        chain_id as i64,
                        vault.as_slice(),
                        user.as_slice(),
                        position_id.to_string()
                    ],
                    row_to_position,
                )
                .optional()?)
        })
        .await
    }

    /// Recorded events of the vault in the order they were applied.
    pub async fn event_records(
        &self,
        chain_id: u64,
        vault: Address,
    ) -> Result<Vec<EventRecord>, StoreError> {
        self.with_reader(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT tx_hash, log_index, block_number, block_timestamp, kind, args
                 FROM vault_events WHERE chain_id = ?1 AND vault = ?2 ORDER BY rowid",
            )?;
            let records = stmt
                .query_map(params![chain_id as i64, vault.as_slice()], |row| {
                    let tx_hash: Vec<u8> = row.get(0)?;
                    let log_index: i64 = row.get(1)?;
                    let block_number: i64 = row.get(2)?;
                    let block_timestamp: i64 = row.get(3)?;
                    let args: String = row.get(5)?;
                    Ok(EventRecord {
                        tx_hash: b256_from_row(&tx_hash, 0)?,
                        log_index: log_index as u64,
                        block_number: block_number as u64,
                        block_timestamp: block_timestamp as u64,
                        kind: row.get(4)?,
                        args: serde_json::from_str(&args).map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(
                                5,
                                rusqlite::types::Type::Text,
                                Box::new(e),
                            )
                        })?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }
}
