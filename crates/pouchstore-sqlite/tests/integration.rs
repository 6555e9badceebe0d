//! Integration tests: the pouchstore wrapper over the SQLite driver.
//!
//! These exercise the full store -> buffer -> flush -> SQLite pipeline,
//! including persistence across reopen and the ephemeral write-through
//! mode.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use pouchstore_core::{ConfigOverrides, Driver, PouchError, PouchStore};
use pouchstore_sqlite::{SqliteDriver, MEMORY};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn db_path(dir: &TempDir) -> String {
    dir.path().join("store.db").to_str().unwrap().to_string()
}

/// File-backed store with a long flush interval: the tests decide when
/// flushes happen.
fn file_store(path: &str) -> PouchStore {
    let driver = SqliteDriver::open(path).unwrap();
    PouchStore::open_with(
        Arc::new(driver),
        ConfigOverrides {
            write_interval: Some(Duration::from_secs(3600)),
            ..ConfigOverrides::default()
        },
    )
    .unwrap()
}

/// Second connection onto the same database, for observing what has
/// actually been committed.
fn raw_driver(path: &str) -> SqliteDriver {
    let driver = SqliteDriver::open(path).unwrap();
    driver.init().unwrap();
    driver
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn test_flush_commits_to_sqlite() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    let store = file_store(&path);

    let receipt = store.set("user:1", json!({"name": "ada"})).unwrap();
    // Buffered only: a second connection sees nothing yet
    assert_eq!(raw_driver(&path).get("user:1").unwrap(), None);

    store.flush().unwrap();
    receipt.wait().unwrap();

    assert_eq!(
        raw_driver(&path).get("user:1").unwrap(),
        Some("{\"name\":\"ada\"}".to_string())
    );
}

#[test]
fn test_values_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);

    {
        let store = file_store(&path);
        store.set("kept", json!([1, 2, 3])).unwrap();
        store.set("doomed", json!("temp")).unwrap();
        store.remove("doomed").unwrap();
        store.close().unwrap();
    }
    {
        let store = file_store(&path);
        assert_eq!(store.get("kept").unwrap(), Some(json!([1, 2, 3])));
        assert_eq!(store.get("doomed").unwrap(), None);
    }
}

#[test]
fn test_drop_flushes_to_sqlite() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);

    {
        let store = file_store(&path);
        store.set("parting", json!("gift")).unwrap();
        // No explicit flush or close
    }

    assert_eq!(
        raw_driver(&path).get("parting").unwrap(),
        Some("\"gift\"".to_string())
    );
}

#[test]
fn test_periodic_flush_persists() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);

    let driver = SqliteDriver::open(&path).unwrap();
    let store = PouchStore::open_with(
        Arc::new(driver),
        ConfigOverrides {
            write_interval: Some(Duration::from_millis(25)),
            ..ConfigOverrides::default()
        },
    )
    .unwrap();

    let receipt = store.set("tick", json!(1)).unwrap();
    receipt.wait().unwrap();

    assert_eq!(raw_driver(&path).get("tick").unwrap(), Some("1".to_string()));
}

// ---------------------------------------------------------------------------
// Coalescing and bulk behavior
// ---------------------------------------------------------------------------

#[test]
fn test_overwrites_coalesce_to_final_value() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    let store = file_store(&path);

    for i in 0..50 {
        store.set("counter", json!(i)).unwrap();
    }
    store.flush().unwrap();

    assert_eq!(raw_driver(&path).get("counter").unwrap(), Some("49".to_string()));
}

#[test]
fn test_mixed_bulk_applies_in_order() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    let store = file_store(&path);

    store.set("a", json!(1)).unwrap();
    store.set("b", json!(2)).unwrap();
    store.remove("a").unwrap();
    store.flush().unwrap();

    let raw = raw_driver(&path);
    assert_eq!(raw.get("a").unwrap(), None);
    assert_eq!(raw.get("b").unwrap(), Some("2".to_string()));
}

// ---------------------------------------------------------------------------
// Subtree accessors
// ---------------------------------------------------------------------------

#[test]
fn test_subtree_write_persists_whole_value() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);

    {
        let store = file_store(&path);
        store.set("cfg", json!({"a": {"b": 1, "c": 2}})).unwrap();
        store.set_sub("cfg", &["a", "b"], json!(42)).unwrap();
        store.close().unwrap();
    }

    assert_eq!(
        raw_driver(&path).get("cfg").unwrap(),
        Some("{\"a\":{\"b\":42,\"c\":2}}".to_string())
    );

    let store = file_store(&path);
    assert_eq!(store.get_sub("cfg", &["a", "b"]).unwrap(), json!(42));
    assert_eq!(store.get_sub("cfg", &["a", "c"]).unwrap(), json!(2));
}

#[test]
fn test_subtree_missing_prefix_fails() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&db_path(&dir));

    store.set("cfg", json!({"a": 1})).unwrap();
    assert!(matches!(
        store.get_sub("cfg", &["a", "deeper"]),
        Err(PouchError::SubvalueNotFound { .. })
    ));
}

// ---------------------------------------------------------------------------
// Ephemeral mode
// ---------------------------------------------------------------------------

#[test]
fn test_memory_store_defaults_to_write_through() {
    let driver = SqliteDriver::open(MEMORY).unwrap();
    let store = PouchStore::open(Arc::new(driver)).unwrap();

    assert!(store.config().is_write_through());
    assert_eq!(store.config().cache, 0);

    store.set("a", json!({"n": 1})).unwrap().wait().unwrap();
    assert_eq!(store.get("a").unwrap(), Some(json!({"n": 1})));
    // Write-through: nothing lingers in the buffer
    assert_eq!(store.buffered_entries(), 0);

    store.remove("a").unwrap();
    assert_eq!(store.get("a").unwrap(), None);

    store.close().unwrap();
}

// ---------------------------------------------------------------------------
// Error surfaces
// ---------------------------------------------------------------------------

#[test]
fn test_malformed_stored_json_surfaces_as_decode_error() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    raw_driver(&path).set("bad", "{definitely not json").unwrap();

    let store = file_store(&path);
    match store.get("bad") {
        Err(PouchError::Decode { key, .. }) => assert_eq!(key, "bad"),
        other => panic!("Expected decode error, got {:?}", other),
    }
}
