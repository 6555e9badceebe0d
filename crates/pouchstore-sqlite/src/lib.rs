//! SQLite driver for pouchstore
//!
//! Implements the pouchstore `Driver` contract over a single embedded
//! SQLite table:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS store (key TEXT PRIMARY KEY, value TEXT)
//! ```
//!
//! Bulk flushes run inside one transaction, so a flush commits
//! all-or-nothing. All statements are parameterized; key and value
//! strings never touch SQL text.
//!
//! The path `":memory:"` opens an ephemeral database. An ephemeral
//! backend declares write-through defaults (no cache, no buffering);
//! file-backed databases declare buffered defaults and WAL journaling.

use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use pouchstore_core::{BulkOp, Config, Driver, PouchError, PouchResult};

/// Path selecting an ephemeral in-memory database.
pub const MEMORY: &str = ":memory:";

fn sql_err(e: rusqlite::Error) -> PouchError {
    PouchError::Driver {
        message: e.to_string(),
    }
}

/// Embedded SQLite backend.
///
/// A single connection behind a mutex; the wrapper already serializes
/// bulk flushes, so connection-level locking is enough.
pub struct SqliteDriver {
    conn: Mutex<Connection>,
    ephemeral: bool,
}

impl SqliteDriver {
    /// Open a database at the given path, or an ephemeral one for
    /// [`MEMORY`].
    ///
    /// The schema is created lazily by `init`, which the store calls
    /// during construction.
    pub fn open(path: &str) -> PouchResult<Self> {
        if path == MEMORY {
            let conn = Connection::open_in_memory().map_err(sql_err)?;
            return Ok(Self {
                conn: Mutex::new(conn),
                ephemeral: true,
            });
        }

        let conn = Connection::open(path).map_err(sql_err)?;
        // WAL keeps readers unblocked during the bulk commits
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(sql_err)?;

        Ok(Self {
            conn: Mutex::new(conn),
            ephemeral: false,
        })
    }

    /// True when backed by an in-memory database.
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }
}

impl Driver for SqliteDriver {
    fn init(&self) -> PouchResult<()> {
        self.conn
            .lock()
            .execute(
                "CREATE TABLE IF NOT EXISTS store (key TEXT PRIMARY KEY, value TEXT)",
                [],
            )
            .map_err(sql_err)?;
        Ok(())
    }

    fn get(&self, key: &str) -> PouchResult<Option<String>> {
        self.conn
            .lock()
            .query_row(
                "SELECT value FROM store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err)
    }

    fn set(&self, key: &str, value: &str) -> PouchResult<()> {
        self.conn
            .lock()
            .execute(
                "REPLACE INTO store (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(sql_err)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> PouchResult<()> {
        self.conn
            .lock()
            .execute("DELETE FROM store WHERE key = ?1", params![key])
            .map_err(sql_err)?;
        Ok(())
    }

    fn do_bulk(&self, ops: &[BulkOp]) -> PouchResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(sql_err)?;
        {
            let mut set_stmt = tx
                .prepare("REPLACE INTO store (key, value) VALUES (?1, ?2)")
                .map_err(sql_err)?;
            let mut remove_stmt = tx
                .prepare("DELETE FROM store WHERE key = ?1")
                .map_err(sql_err)?;

            // Any failure drops the transaction and rolls everything back
            for op in ops {
                match op {
                    BulkOp::Set { key, value } => {
                        set_stmt.execute(params![key, value]).map_err(sql_err)?;
                    }
                    BulkOp::Remove { key } => {
                        remove_stmt.execute(params![key]).map_err(sql_err)?;
                    }
                }
            }
        }
        tx.commit().map_err(sql_err)
    }

    fn close(&self) -> PouchResult<()> {
        // The connection is released when the driver drops; there is no
        // earlier teardown worth doing for SQLite.
        Ok(())
    }

    fn default_config(&self) -> Option<Config> {
        Some(if self.ephemeral {
            Config::immediate()
        } else {
            Config {
                cache: 1000,
                write_interval: Duration::from_millis(100),
                json: true,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_driver() -> SqliteDriver {
        let driver = SqliteDriver::open(MEMORY).unwrap();
        driver.init().unwrap();
        driver
    }

    #[test]
    fn test_get_missing_returns_none() {
        let driver = memory_driver();
        assert_eq!(driver.get("nope").unwrap(), None);
    }

    #[test]
    fn test_set_is_upsert() {
        let driver = memory_driver();
        driver.set("k", "v1").unwrap();
        driver.set("k", "v2").unwrap();
        assert_eq!(driver.get("k").unwrap(), Some("v2".to_string()));
    }

    #[test]
    fn test_remove_missing_is_not_an_error() {
        let driver = memory_driver();
        driver.remove("ghost").unwrap();
    }

    #[test]
    fn test_values_with_quotes_survive() {
        // Parameterized statements: hostile strings are plain data
        let driver = memory_driver();
        let hostile = "'; DROP TABLE store; --";
        driver.set(hostile, "it's a value with 'quotes'").unwrap();
        assert_eq!(
            driver.get(hostile).unwrap(),
            Some("it's a value with 'quotes'".to_string())
        );
        driver.set("k", "v").unwrap();
        assert_eq!(driver.get("k").unwrap(), Some("v".to_string()));
    }

    #[test]
    fn test_bulk_applies_in_order() {
        let driver = memory_driver();
        driver
            .do_bulk(&[
                BulkOp::Set {
                    key: "a".to_string(),
                    value: "1".to_string(),
                },
                BulkOp::Set {
                    key: "b".to_string(),
                    value: "2".to_string(),
                },
                BulkOp::Remove {
                    key: "a".to_string(),
                },
            ])
            .unwrap();

        assert_eq!(driver.get("a").unwrap(), None);
        assert_eq!(driver.get("b").unwrap(), Some("2".to_string()));
    }

    #[test]
    fn test_empty_bulk_commits() {
        let driver = memory_driver();
        driver.do_bulk(&[]).unwrap();
    }

    #[test]
    fn test_memory_defaults_are_write_through() {
        let driver = memory_driver();
        let config = driver.default_config().unwrap();
        assert_eq!(config.cache, 0);
        assert!(config.is_write_through());
        assert!(config.json);
    }

    #[test]
    fn test_file_defaults_are_buffered() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("store.db");
        let driver = SqliteDriver::open(path.to_str().unwrap()).unwrap();
        driver.init().unwrap();

        let config = driver.default_config().unwrap();
        assert_eq!(config.cache, 1000);
        assert_eq!(config.write_interval, Duration::from_millis(100));
        assert!(config.json);
        assert!(!driver.is_ephemeral());
    }

    #[test]
    fn test_file_backed_persistence() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("store.db");
        let path = path.to_str().unwrap();

        {
            let driver = SqliteDriver::open(path).unwrap();
            driver.init().unwrap();
            driver.set("durable", "yes").unwrap();
        }
        {
            let driver = SqliteDriver::open(path).unwrap();
            driver.init().unwrap();
            assert_eq!(driver.get("durable").unwrap(), Some("yes".to_string()));
        }
    }
}
