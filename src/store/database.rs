//! Store handle
//!
//! Owns the single SQLite connection and hands it out to repository code.
//! Every multi-step operation runs inside `with_tx`, which opens an
//! `IMMEDIATE` transaction so concurrent writers are serialized and a
//! failure rolls back every statement of the operation.

use rusqlite::{Connection, OpenFlags, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::store::error::{StoreError, StoreResult};
use crate::store::schema;

/// Configuration for the store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory for the database file
    pub data_dir: PathBuf,
    /// How long SQLite waits on a locked database before giving up
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("schoolcoin_data"),
            busy_timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Get path to the database file
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("schoolcoin.db")
    }
}

/// Row counts for health and status output
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StoreStats {
    pub schools: i64,
    pub profiles: i64,
    pub transactions: i64,
    pub schema_version: i64,
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "schools={}, profiles={}, transactions={}, schema=v{}",
            self.schools, self.profiles, self.transactions, self.schema_version
        )
    }
}

/// The SchoolCoin store
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct Store {
    /// std::sync::Mutex because rusqlite::Connection is !Sync
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (or create) the database under `config.data_dir` and migrate it
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let path = config.db_path();

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        let store = Self::init(conn, Duration::from_millis(config.busy_timeout_ms), Some(path))?;
        tracing::info!(path = ?store.path, "Opened store");
        Ok(store)
    }

    /// Open a private in-memory database, used by tests and benchmarks
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, Duration::from_millis(5_000), None)
    }

    fn init(mut conn: Connection, busy_timeout: Duration, path: Option<PathBuf>) -> StoreResult<Self> {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::migrate(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Path of the database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` with the connection locked
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))?;
        f(&conn)
    }

    /// Run `f` inside an IMMEDIATE transaction, commit on `Ok`, roll back on `Err`
    pub fn with_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))?;

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Cheap liveness check against the database
    pub fn ping(&self) -> bool {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(StoreError::from)
        })
        .is_ok()
    }

    /// Row counts across the main tables
    pub fn stats(&self) -> StoreResult<StoreStats> {
        self.with_conn(|conn| {
            let count = |table: &str| -> StoreResult<i64> {
                let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })?;
                Ok(n)
            };

            Ok(StoreStats {
                schools: count("schools")?,
                profiles: count("profiles")?,
                transactions: count("transactions")?,
                schema_version: schema::current_version(conn)?,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_on_disk_and_reopen() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::new(dir.path());

        let store = Store::open(&config).unwrap();
        assert!(store.ping());
        assert_eq!(store.path(), Some(config.db_path().as_path()));
        drop(store);

        let reopened = Store::open(&config).unwrap();
        let stats = reopened.stats().unwrap();
        assert_eq!(stats.schema_version, schema::latest_version());
        assert_eq!(stats.schools, 0);
    }

    #[test]
    fn test_with_tx_rolls_back_on_error() {
        let store = Store::open_in_memory().unwrap();

        let result: StoreResult<()> = store.with_tx(|tx| {
            tx.execute(
                "INSERT INTO schools (name, coin_name, coin_symbol, created_at)
                 VALUES ('Test', 'Coin', 'C', '2024-01-01')",
                [],
            )?;
            Err(StoreError::Validation("abort".to_string()))
        });
        assert!(result.is_err());

        assert_eq!(store.stats().unwrap().schools, 0);
    }
}
