//! Relational snapshot of the indexed state backed by SQLite.
//!
//! [`Store`] keeps a dedicated writer connection for serialized writes and a
//! connection pool for concurrent reads. In WAL mode readers proceed without
//! blocking the writer and see committed data only.
//!
//! Every write is an upsert keyed by a stable composite identifier, with the
//! update branch guarded so re-applying identical data changes no rows.

mod migrations;
mod positions;
mod vaults;

use std::{
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use alloy::primitives::{Address, B256, U256};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, InterruptHandle};
use tracing::{info, warn};

use crate::error::StoreError;

pub use migrations::{MIGRATIONS, Migration};
pub use positions::EventRecord;

/// Default bound of a single storage transaction.
pub const DEFAULT_TX_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a timed-out write gets to observe its cancellation.
const CANCEL_GRACE: Duration = Duration::from_millis(100);

#[derive(Clone, derive_more::Debug)]
pub struct Store {
    #[debug(skip)]
    read_pool: Pool<SqliteConnectionManager>,
    #[debug(skip)]
    writer: Arc<Mutex<Connection>>,
    #[debug(skip)]
    interrupt: Arc<InterruptHandle>,
    tx_timeout: Duration,
}

/// Configure a connection with standard PRAGMAs for WAL mode.
fn configure_connection(conn: &Connection, busy_timeout: Duration) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA foreign_keys=ON;",
    )
}

impl Store {
    /// Opens the on-disk database, creating it if missing.
    ///
    /// Schema is not touched, call [`Self::migrate`] before use.
    pub fn open(path: impl AsRef<Path>, tx_timeout: Duration) -> Result<Self, StoreError> {
        let writer = Connection::open(&path)?;
        configure_connection(&writer, tx_timeout)?;

        let manager = SqliteConnectionManager::file(&path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .with_init(move |conn| configure_connection(conn, tx_timeout));
        let read_pool = Pool::builder().max_size(4).build(manager)?;

        Ok(Self {
            read_pool,
            interrupt: Arc::new(writer.get_interrupt_handle()),
            writer: Arc::new(Mutex::new(writer)),
            tx_timeout,
        })
    }

    /// Creates a migrated in-memory database for testing.
    ///
    /// In-memory SQLite databases are per-connection, so all connections share
    /// a uniquely named database via a shared cache URI.
    pub fn in_memory() -> Result<Self, StoreError> {
        let uri = format!("file:lending_{}?mode=memory&cache=shared", unique_id());
        let writer = Connection::open(&uri)?;
        configure_connection(&writer, DEFAULT_TX_TIMEOUT)?;

        let manager = SqliteConnectionManager::file(&uri)
            .with_init(|conn| configure_connection(conn, DEFAULT_TX_TIMEOUT));
        let read_pool = Pool::builder().max_size(2).build(manager)?;

        let mut writer = writer;
        migrations::run(&mut writer, MIGRATIONS)?;

        Ok(Self {
            read_pool,
            interrupt: Arc::new(writer.get_interrupt_handle()),
            writer: Arc::new(Mutex::new(writer)),
            tx_timeout: DEFAULT_TX_TIMEOUT,
        })
    }

    /// Sets the bound of a single storage transaction.
    pub fn with_tx_timeout(mut self, tx_timeout: Duration) -> Self {
        self.tx_timeout = tx_timeout;
        self
    }

    pub fn tx_timeout(&self) -> Duration {
        self.tx_timeout
    }

    /// Takes the writer connection on a separate thread for `duration`,
    /// returning once it is held.
    #[cfg(test)]
    pub(crate) fn hold_writer(&self, duration: Duration) -> std::thread::JoinHandle<()> {
        let writer = self.writer.clone();
        let (held, wait) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _conn = writer.lock().unwrap();
            held.send(()).unwrap();
            std::thread::sleep(duration);
        });
        wait.recv().unwrap();
        holder
    }

    /// Applies pending migrations, returns the number applied.
    pub async fn migrate(&self) -> Result<usize, StoreError> {
        let applied = self
            .with_writer(|conn| migrations::run(conn, MIGRATIONS))
            .await?;
        info!(applied, "Database schema up to date");
        Ok(applied)
    }

    /// Latest applied migration version, zero for a fresh database.
    pub async fn schema_version(&self) -> Result<u32, StoreError> {
        self.with_reader(migrations::current_version).await
    }

    /// Runs `f` on the writer connection off the async runtime.
    ///
    /// Once the transaction timeout elapses the running statement is
    /// interrupted and any later commit of `f` is rolled back, so
    /// [`StoreError::Timeout`] means nothing was committed.
    async fn with_writer<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let writer = self.writer.clone();
        let cancelled = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(false));
        let tx_timeout = self.tx_timeout;
        let mut task = {
            let cancelled = cancelled.clone();
            let running = running.clone();
            tokio::task::spawn_blocking(move || {
                let mut conn = writer.lock().map_err(|_| StoreError::Poisoned)?;
                if cancelled.load(Ordering::SeqCst) {
                    return Err(StoreError::Timeout(tx_timeout));
                }
                running.store(true, Ordering::SeqCst);
                // Returning true turns the commit into a rollback
                let veto = cancelled.clone();
                conn.commit_hook(Some(move || veto.load(Ordering::SeqCst)));
                let result = f(&mut conn);
                conn.commit_hook(None::<fn() -> bool>);
                running.store(false, Ordering::SeqCst);
                result
            })
        };

        match tokio::time::timeout(tx_timeout, &mut task).await {
            Ok(joined) => joined.map_err(|e| StoreError::Task(e.to_string()))?,
            Err(_) => {
                cancelled.store(true, Ordering::SeqCst);
                if running.load(Ordering::SeqCst) {
                    self.interrupt.interrupt();
                }
                warn!(?tx_timeout, "Storage transaction timed out, cancelling");
                match tokio::time::timeout(CANCEL_GRACE, task).await {
                    // Committed before the cancellation was observed
                    Ok(Ok(Ok(value))) => Ok(value),
                    _ => Err(StoreError::Timeout(tx_timeout)),
                }
            }
        }
    }

    /// Runs `f` on a pooled read connection off the async runtime.
    async fn with_reader<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.read_pool.clone();
        let task = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        });
        self.bounded(task).await
    }

    async fn bounded<T>(
        &self,
        task: tokio::task::JoinHandle<Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.tx_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => Err(StoreError::Task(err.to_string())),
            Err(_) => Err(StoreError::Timeout(self.tx_timeout)),
        }
    }
}

fn unique_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

fn address_from_row(bytes: &[u8], col: usize) -> rusqlite::Result<Address> {
    if bytes.len() != 20 {
        return Err(rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Blob,
            format!("expected 20 bytes for Address, got {}", bytes.len()).into(),
        ));
    }
    Ok(Address::from_slice(bytes))
}

fn b256_from_row(bytes: &[u8], col: usize) -> rusqlite::Result<B256> {
    if bytes.len() != 32 {
        return Err(rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Blob,
            format!("expected 32 bytes for B256, got {}", bytes.len()).into(),
        ));
    }
    Ok(B256::from_slice(bytes))
}

fn u256_from_row(text: &str, col: usize) -> rusqlite::Result<U256> {
    U256::from_str_radix(text, 10).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Text,
            format!("invalid decimal U256 {text:?}: {e}").into(),
        )
    })
}

fn opt_u256_from_row(text: Option<String>, col: usize) -> rusqlite::Result<Option<U256>> {
    text.map(|t| u256_from_row(&t, col)).transpose()
}

fn enum_from_row<T>(
    text: &str,
    col: usize,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    parse(text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Text,
            format!("unexpected value {text:?}").into(),
        )
    })
}
