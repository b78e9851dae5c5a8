use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use crate::error::StoreError;

/// Forward-only schema change.
#[derive(Clone, Copy, Debug)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

/// Schema history, strictly increasing versions.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial schema",
        sql: "CREATE TABLE vaults (
                  chain_id INTEGER NOT NULL,
                  address BLOB NOT NULL,
                  asset BLOB NOT NULL,
                  symbol TEXT NOT NULL,
                  decimals INTEGER NOT NULL,
                  active INTEGER NOT NULL DEFAULT 1,
                  updated_at INTEGER NOT NULL,
                  PRIMARY KEY (chain_id, address)
              );

              CREATE TABLE sync_cursors (
                  chain_id INTEGER NOT NULL,
                  vault BLOB NOT NULL,
                  last_block INTEGER NOT NULL,
                  updated_at INTEGER NOT NULL,
                  PRIMARY KEY (chain_id, vault)
              );

              CREATE TABLE positions (
                  id INTEGER PRIMARY KEY AUTOINCREMENT,
                  chain_id INTEGER NOT NULL,
                  vault BLOB NOT NULL,
                  user BLOB NOT NULL,
                  position_id TEXT NOT NULL,
                  side TEXT,
                  strategy_id TEXT,
                  principal TEXT,
                  collateral TEXT,
                  opened_block INTEGER,
                  opened_at INTEGER,
                  status TEXT NOT NULL,
                  close_reason TEXT,
                  repaid TEXT,
                  collateral_returned TEXT,
                  closed_block INTEGER,
                  closed_at INTEGER,
                  UNIQUE (chain_id, vault, user, position_id)
              );

              CREATE TABLE vault_events (
                  chain_id INTEGER NOT NULL,
                  tx_hash BLOB NOT NULL,
                  log_index INTEGER NOT NULL,
                  vault BLOB NOT NULL,
                  block_number INTEGER NOT NULL,
                  block_timestamp INTEGER NOT NULL,
                  kind TEXT NOT NULL,
                  args TEXT NOT NULL,
                  PRIMARY KEY (chain_id, tx_hash, log_index)
              );
              CREATE INDEX idx_vault_events_vault ON vault_events(chain_id, vault, block_number);",
    },
    Migration {
        version: 2,
        name: "closed positions by user",
        sql: "CREATE INDEX idx_positions_user_closed
                  ON positions(chain_id, user, status, closed_at DESC, id DESC);",
    },
];

const BOOTSTRAP: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
                             version INTEGER PRIMARY KEY,
                             name TEXT NOT NULL,
                             applied_at INTEGER NOT NULL
                         );";

/// Latest applied migration version, zero if none.
pub(super) fn current_version(conn: &Connection) -> Result<u32, StoreError> {
    let bootstrapped = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'",
            [],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if !bootstrapped {
        return Ok(0);
    }
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?)
}

/// Applies migrations newer than the current version, each in its own
/// transaction together with its version record.
pub(super) fn run(conn: &mut Connection, migrations: &[Migration]) -> Result<usize, StoreError> {
    for pair in migrations.windows(2) {
        if pair[1].version <= pair[0].version {
            return Err(StoreError::Migration {
                version: pair[1].version,
                reason: format!("out of order after version {}", pair[0].version),
            });
        }
    }

    conn.execute_batch(BOOTSTRAP)?;
    let current = current_version(conn)?;

    let mut applied = 0;
    for migration in migrations.iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)
            .map_err(|e| StoreError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, super::unix_now()],
        )?;
        tx.commit()?;

        info!(
            version = migration.version,
            name = migration.name,
            "Applied migration"
        );
        applied += 1;
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |_| Ok(()),
        )
        .optional()
        .unwrap()
        .is_some()
    }

    #[test]
    fn test_migrations_rerun_is_noop() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(current_version(&conn).unwrap(), 0);

        assert_eq!(run(&mut conn, MIGRATIONS).unwrap(), MIGRATIONS.len());
        assert_eq!(run(&mut conn, MIGRATIONS).unwrap(), 0);
        assert_eq!(
            current_version(&conn).unwrap(),
            MIGRATIONS.last().unwrap().version
        );
        assert!(table_exists(&conn, "positions"));
    }

    #[test]
    fn test_failed_migration_rolls_back() {
        let mut conn = Connection::open_in_memory().unwrap();
        let migrations = [
            Migration {
                version: 1,
                name: "ok",
                sql: "CREATE TABLE a (x INTEGER);",
            },
            Migration {
                version: 2,
                name: "broken",
                sql: "CREATE TABLE b (x INTEGER); CREATE TABLE a (y INTEGER);",
            },
        ];
        assert!(matches!(
            run(&mut conn, &migrations),
            Err(StoreError::Migration { version: 2, .. })
        ));
        assert_eq!(current_version(&conn).unwrap(), 1);
        assert!(table_exists(&conn, "a"));
        assert!(!table_exists(&conn, "b"));
    }

    #[test]
    fn test_out_of_order_migrations_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        let migrations = [
            Migration {
                version: 2,
                name: "second",
                sql: "CREATE TABLE b (x INTEGER);",
            },
            Migration {
                version: 1,
                name: "first",
                sql: "CREATE TABLE a (x INTEGER);",
            },
        ];
        assert!(matches!(
            run(&mut conn, &migrations),
            Err(StoreError::Migration { version: 1, .. })
        ));
        assert!(!table_exists(&conn, "a"));
    }
}
