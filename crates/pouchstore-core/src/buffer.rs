//! Write buffer — in-memory entry table shared by the read cache and the
//! flush engine.
//!
//! Each resident key maps to an Entry holding the decoded value, a dirty
//! flag, a last-touch timestamp and the completion channels of buffered
//! writes. The map lock is held across insert / lookup / mutate / sweep /
//! flush collection, never across driver I/O.
//!
//! The live-entry count is the map length. There is no separate counter
//! to drift out of sync.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::time::Instant;

use hashbrown::HashMap;
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;

use crate::error::{PouchError, PouchResult};

/// One resident key.
///
/// `value: None` is the deleted marker: a buffered `remove` that has not
/// reached the backend yet, or a cached driver miss.
pub(crate) struct Entry {
    pub(crate) value: Option<Value>,
    pub(crate) dirty: bool,
    pub(crate) touched: Instant,
    pub(crate) waiters: Vec<SyncSender<PouchResult<()>>>,
}

/// A dirty entry drained from the buffer for one flush cycle.
///
/// Holds the decoded value (for restore-on-failure) and the waiters to
/// notify once the bulk completes.
pub(crate) struct PendingWrite {
    pub(crate) key: String,
    pub(crate) value: Option<Value>,
    pub(crate) waiters: Vec<SyncSender<PouchResult<()>>>,
}

/// Completion handle for one buffered write.
///
/// Resolves exactly once: with `Ok(())` when the flush that carried the
/// write committed, or with the bulk's error. In write-through mode the
/// receipt is already resolved when returned. Dropping a receipt is
/// allowed; a flush error for an unclaimed receipt is logged instead of
/// raised.
pub struct WriteReceipt {
    rx: Receiver<PouchResult<()>>,
}

impl WriteReceipt {
    /// Block until the write is acknowledged by the backend.
    pub fn wait(self) -> PouchResult<()> {
        match self.rx.recv() {
            Ok(result) => result,
            // Sender dropped without resolving: the store shut down with
            // the write still buffered.
            Err(_) => Err(PouchError::Driver {
                message: "store closed before write was flushed".to_string(),
            }),
        }
    }

    /// A receipt that is already resolved with the given result.
    pub(crate) fn resolved(result: PouchResult<()>) -> Self {
        let (tx, rx) = sync_channel(1);
        // Capacity 1 and a live receiver: this send cannot fail.
        let _ = tx.send(result);
        Self { rx }
    }
}

/// Outcome of one eviction sweep.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Sweep {
    /// Buffer below the watermark (or caching disabled); nothing done.
    UnderLimit,
    /// Evicted this many clean entries.
    Evicted(usize),
    /// Every resident entry is dirty; a flush must run before eviction
    /// can make progress.
    AllDirty,
}

/// Shared entry table plus flush statistics.
pub(crate) struct WriteBuffer {
    entries: Mutex<HashMap<String, Entry>>,
    /// Serializes flush cycles; two flushes never run concurrently.
    flush_gate: Mutex<()>,
    /// Total writes acknowledged by the backend since store creation
    total_flushed: AtomicU64,
    /// Total flush cycles completed (empty cycles included)
    flush_cycles: AtomicU64,
}

impl WriteBuffer {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            flush_gate: Mutex::new(()),
            total_flushed: AtomicU64::new(0),
            flush_cycles: AtomicU64::new(0),
        }
    }

    /// Serve a key from the buffer if the entry qualifies.
    ///
    /// An entry qualifies when clean reads are cacheable (`serve_clean`)
    /// or when it is dirty — a dirty entry must be served regardless of
    /// the cache setting to preserve read-your-writes. A hit refreshes
    /// the entry's timestamp.
    ///
    /// Outer None: not servable from the buffer, ask the driver.
    /// Inner None: resident deleted marker, the key reads as absent.
    pub(crate) fn lookup(&self, key: &str, serve_clean: bool) -> Option<Option<Value>> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(key)?;
        if serve_clean || entry.dirty {
            entry.touched = Instant::now();
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Insert a clean entry from a driver read.
    ///
    /// A concurrent buffered write wins: if the key went dirty while the
    /// driver read was in flight, the stale clean value is discarded.
    pub(crate) fn insert_clean(&self, key: &str, value: Option<Value>) {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.dirty => {}
            Some(entry) => {
                entry.value = value;
                entry.touched = Instant::now();
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value,
                        dirty: false,
                        touched: Instant::now(),
                        waiters: Vec::new(),
                    },
                );
            }
        }
    }

    /// Record a buffered mutation: upsert a dirty entry and register a
    /// completion channel for the next flush.
    pub(crate) fn write(&self, key: &str, value: Option<Value>) -> WriteReceipt {
        let (tx, rx) = sync_channel(1);
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) => {
                entry.value = value;
                entry.dirty = true;
                entry.touched = Instant::now();
                entry.waiters.push(tx);
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value,
                        dirty: true,
                        touched: Instant::now(),
                        waiters: vec![tx],
                    },
                );
            }
        }
        WriteReceipt { rx }
    }

    /// Number of resident entries.
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Number of entries holding unflushed mutations.
    pub(crate) fn dirty_count(&self) -> usize {
        self.entries.lock().values().filter(|e| e.dirty).count()
    }

    /// Eviction sweep. Invoked after every insertion or mutation.
    ///
    /// Below the watermark (or with caching disabled) this is a no-op.
    /// Over the watermark, the oldest half of the clean entries is
    /// evicted in one batched sweep. Dirty entries are never evicted; if
    /// every entry is dirty the caller must flush and sweep again.
    pub(crate) fn evict_clean(&self, cache: usize) -> Sweep {
        let mut entries = self.entries.lock();
        if cache == 0 || entries.len() < cache {
            return Sweep::UnderLimit;
        }

        let mut clean: Vec<(String, Instant)> = entries
            .iter()
            .filter(|(_, e)| !e.dirty)
            .map(|(k, e)| (k.clone(), e.touched))
            .collect();

        if clean.is_empty() {
            return Sweep::AllDirty;
        }

        // Oldest first; one sweep takes up to half the watermark
        clean.sort_by_key(|(_, touched)| *touched);
        let evict = clean.len().min(cache.div_ceil(2));
        for (key, _) in clean.iter().take(evict) {
            entries.remove(key);
        }
        Sweep::Evicted(evict)
    }

    /// Drain all dirty entries for one flush cycle.
    ///
    /// Clears the dirty flag and takes the waiters BEFORE the bulk is
    /// submitted: a write arriving while the bulk is in flight re-dirties
    /// its entry and is carried by the next cycle, never lost or
    /// duplicated. Enumeration order of the map decides cross-key
    /// ordering, which is not contractual.
    pub(crate) fn drain_dirty(&self) -> Vec<PendingWrite> {
        let mut entries = self.entries.lock();
        let mut batch = Vec::new();
        for (key, entry) in entries.iter_mut() {
            if !entry.dirty {
                continue;
            }
            entry.dirty = false;
            batch.push(PendingWrite {
                key: key.clone(),
                value: entry.value.clone(),
                waiters: std::mem::take(&mut entry.waiters),
            });
        }
        batch
    }

    /// Restore a failed batch as dirty so the next cycle retries it.
    ///
    /// An entry re-dirtied by a newer write keeps that newer value. An
    /// entry evicted or dropped while the bulk was in flight is
    /// reinserted with the batch value.
    pub(crate) fn restore_dirty(&self, batch: &[PendingWrite]) {
        let mut entries = self.entries.lock();
        for pending in batch {
            match entries.get_mut(&pending.key) {
                Some(entry) if entry.dirty => {}
                Some(entry) => {
                    entry.value = pending.value.clone();
                    entry.dirty = true;
                }
                None => {
                    entries.insert(
                        pending.key.clone(),
                        Entry {
                            value: pending.value.clone(),
                            dirty: true,
                            touched: Instant::now(),
                            waiters: Vec::new(),
                        },
                    );
                }
            }
        }
    }

    /// Drop entries that are still clean after a successful flush.
    ///
    /// Used when caching is disabled: flushed entries have no further
    /// reason to stay resident. Entries re-dirtied during the bulk stay.
    pub(crate) fn drop_clean(&self, keys: &[String]) {
        let mut entries = self.entries.lock();
        for key in keys {
            if let Some(entry) = entries.get(key) {
                if !entry.dirty {
                    entries.remove(key);
                }
            }
        }
    }

    /// Hold the flush gate for the duration of one cycle.
    pub(crate) fn lock_flush(&self) -> MutexGuard<'_, ()> {
        self.flush_gate.lock()
    }

    /// Record a completed flush cycle.
    pub(crate) fn record_cycle(&self, flushed: u64) {
        self.total_flushed.fetch_add(flushed, Ordering::Relaxed);
        self.flush_cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Total writes acknowledged by the backend since store creation.
    pub(crate) fn total_flushed(&self) -> u64 {
        self.total_flushed.load(Ordering::Relaxed)
    }

    /// Total flush cycles completed.
    pub(crate) fn flush_cycles(&self) -> u64 {
        self.flush_cycles.load(Ordering::Relaxed)
    }
}
