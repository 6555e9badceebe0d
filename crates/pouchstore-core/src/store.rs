//! Public store façade — the heart of pouchstore.
//!
//! PouchStore combines a read cache and a write buffer over a pluggable
//! storage driver.
//!
//! **Read path**: buffer-first; misses delegate to the driver and are
//! cached clean.
//! **Write path**: buffered as dirty entries, coalesced per key, drained
//! into one atomic bulk per flush cycle.
//! **Background**: a flusher thread drains the buffer on a fixed interval
//! and on shutdown.
//!
//! Read-your-writes holds within the process: a buffered mutation is
//! always served from the buffer, whether or not it reached the backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::buffer::{Sweep, WriteBuffer, WriteReceipt};
use crate::config::{Config, ConfigOverrides};
use crate::driver::Driver;
use crate::error::{PouchError, PouchResult};
use crate::flusher::{encode_value, flush_cycle, start_flusher, FlushHandle};
use crate::subtree;

/// Buffered, cached key-value store over a pluggable driver.
///
/// All public methods take `&self`; the store is safe to share across
/// threads behind an `Arc`. The buffer lock is never held across driver
/// I/O.
pub struct PouchStore {
    /// Backing storage driver
    driver: Arc<dyn Driver>,
    /// Shared entry table, also owned by the flusher thread
    buffer: Arc<WriteBuffer>,
    /// Effective configuration, frozen at construction
    config: Config,
    /// Background flusher handle (None in write-through mode)
    flusher: Mutex<Option<FlushHandle>>,
    /// Set once the driver has been released; Drop skips a second close
    closed: AtomicBool,
}

impl PouchStore {
    /// Open a store with the driver's preferred configuration.
    pub fn open(driver: Arc<dyn Driver>) -> PouchResult<Self> {
        Self::open_with(driver, ConfigOverrides::default())
    }

    /// Open a store with caller overrides.
    ///
    /// Resolution order: built-in defaults, then the driver's
    /// `default_config`, then `overrides`. The result is frozen for the
    /// life of the store.
    pub fn open_with(driver: Arc<dyn Driver>, overrides: ConfigOverrides) -> PouchResult<Self> {
        let base = driver.default_config().unwrap_or_default();
        let config = overrides.over(base);

        driver.init()?;

        let buffer = Arc::new(WriteBuffer::new());
        let flusher = if config.is_write_through() {
            None
        } else {
            Some(start_flusher(
                Arc::clone(&buffer),
                Arc::clone(&driver),
                config,
            )?)
        };

        Ok(Self {
            driver,
            buffer,
            config,
            flusher: Mutex::new(flusher),
            closed: AtomicBool::new(false),
        })
    }

    /// Effective configuration.
    pub fn config(&self) -> Config {
        self.config
    }

    /// Read a key.
    ///
    /// Served from the buffer when the entry qualifies (always for dirty
    /// entries, only with caching on for clean ones); otherwise the
    /// driver is asked and the result, including a miss, is cached
    /// clean when caching is on.
    pub fn get(&self, key: &str) -> PouchResult<Option<Value>> {
        if let Some(value) = self.buffer.lookup(key, self.config.cache > 0) {
            return Ok(value);
        }

        let decoded = match self.driver.get(key)? {
            None => None,
            Some(raw) => Some(self.decode(key, &raw)?),
        };

        if self.config.cache > 0 {
            self.buffer.insert_clean(key, decoded.clone());
            self.maybe_evict();
        }
        Ok(decoded)
    }

    /// Write a key.
    ///
    /// Buffered mode returns immediately; the receipt resolves when the
    /// flush carrying this write completes. Write-through mode performs
    /// the driver call inline and returns a resolved receipt.
    pub fn set(&self, key: &str, value: Value) -> PouchResult<WriteReceipt> {
        self.put(key, Some(value))
    }

    /// Delete a key. Exactly a `set` of the deleted marker.
    pub fn remove(&self, key: &str) -> PouchResult<WriteReceipt> {
        self.put(key, None)
    }

    fn put(&self, key: &str, value: Option<Value>) -> PouchResult<WriteReceipt> {
        if self.config.is_write_through() {
            match &value {
                None => self.driver.remove(key)?,
                Some(v) => {
                    let raw = encode_value(key, v, self.config.json)?;
                    self.driver.set(key, &raw)?;
                }
            }
            return Ok(WriteReceipt::resolved(Ok(())));
        }

        let receipt = self.buffer.write(key, value);
        self.maybe_evict();
        Ok(receipt)
    }

    /// Read a subtree of a stored JSON value.
    ///
    /// Fails with `SubvalueNotFound` when the key is absent or any path
    /// step is absent or not an object. An empty path returns the whole
    /// value.
    pub fn get_sub(&self, key: &str, path: &[&str]) -> PouchResult<Value> {
        let root = self
            .get(key)?
            .ok_or_else(|| self.subvalue_err(key, path))?;
        match subtree::get_path(&root, path) {
            Some(leaf) => Ok(leaf.clone()),
            None => Err(self.subvalue_err(key, path)),
        }
    }

    /// Write a subtree of a stored JSON value.
    ///
    /// Loads the whole value, walks all but the last step under the same
    /// rule as `get_sub`, assigns at the final step and stores the whole
    /// value back. The read and the write are not locked against each
    /// other; concurrent subtree writes on one key may lose updates.
    /// An empty path replaces the whole value.
    pub fn set_sub(&self, key: &str, path: &[&str], value: Value) -> PouchResult<WriteReceipt> {
        if path.is_empty() {
            return self.set(key, value);
        }

        let mut root = self
            .get(key)?
            .ok_or_else(|| self.subvalue_err(key, path))?;
        if !subtree::set_path(&mut root, path, value) {
            return Err(self.subvalue_err(key, path));
        }
        self.set(key, root)
    }

    /// Drain all buffered mutations into one bulk now.
    ///
    /// A no-op when nothing is dirty. Serialized against the periodic
    /// flusher; two flush cycles never run concurrently.
    pub fn flush(&self) -> PouchResult<()> {
        flush_cycle(&self.buffer, self.driver.as_ref(), &self.config)
    }

    /// Flush, stop the background flusher and release the driver.
    ///
    /// Idempotent: the driver is released at most once, by whichever of
    /// `close` and `Drop` gets there first. `Drop` performs the same
    /// shutdown without surfacing errors.
    pub fn close(&self) -> PouchResult<()> {
        // The flusher's shutdown path runs a final flush of its own; the
        // explicit cycle covers write-through stores and anything that
        // went dirty since.
        if let Some(handle) = self.flusher.lock().take() {
            handle.shutdown();
        }
        self.flush()?;
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.driver.close()?;
        }
        Ok(())
    }

    /// Entries currently resident in the buffer.
    pub fn buffered_entries(&self) -> usize {
        self.buffer.len()
    }

    /// Entries holding mutations not yet acknowledged by the backend.
    pub fn dirty_count(&self) -> usize {
        self.buffer.dirty_count()
    }

    /// Total writes acknowledged by the backend since the store opened.
    pub fn total_flushed(&self) -> u64 {
        self.buffer.total_flushed()
    }

    /// Total flush cycles completed (empty cycles included).
    pub fn flush_cycles(&self) -> u64 {
        self.buffer.flush_cycles()
    }

    fn decode(&self, key: &str, raw: &str) -> PouchResult<Value> {
        if self.config.json {
            serde_json::from_str(raw).map_err(|e| PouchError::Decode {
                key: key.to_string(),
                message: e.to_string(),
            })
        } else {
            Ok(Value::String(raw.to_string()))
        }
    }

    fn subvalue_err(&self, key: &str, path: &[&str]) -> PouchError {
        PouchError::SubvalueNotFound {
            key: key.to_string(),
            path: subtree::join_path(path),
        }
    }

    /// Eviction sweep, run after every insertion or mutation.
    ///
    /// When every resident entry is dirty the sweep cannot make progress;
    /// a flush runs inline and the sweep is repeated. A failing inline
    /// flush is logged (its waiters already carry the error) and the
    /// buffer stays over the watermark until the next cycle succeeds.
    fn maybe_evict(&self) {
        if let Sweep::AllDirty = self.buffer.evict_clean(self.config.cache) {
            if let Err(e) = self.flush() {
                eprintln!("[GC] flush before eviction failed: {}", e);
                return;
            }
            self.buffer.evict_clean(self.config.cache);
        }
    }
}

impl Drop for PouchStore {
    fn drop(&mut self) {
        if let Some(handle) = self.flusher.lock().take() {
            // Runs a final flush on the background thread before joining.
            handle.shutdown();
        }
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.driver.close() {
                eprintln!("[CLOSE] driver close failed: {}", e);
            }
        }
    }
}
