//! In-memory driver
//!
//! Hash map based backend, useful for tests and single-process use. The
//! driver records every bulk it receives and can be told to fail the next
//! bulk, so the core test suite can observe the flush protocol from the
//! backend's side.

use std::sync::atomic::{AtomicBool, Ordering};

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::driver::{BulkOp, Driver};
use crate::error::{PouchError, PouchResult};

/// In-memory implementation of the driver contract.
pub struct MemoryDriver {
    map: Mutex<HashMap<String, String>>,
    bulks: Mutex<Vec<Vec<BulkOp>>>,
    fail_next_bulk: AtomicBool,
}

impl MemoryDriver {
    /// Create a new empty in-memory driver.
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
            bulks: Mutex::new(Vec::new()),
            fail_next_bulk: AtomicBool::new(false),
        }
    }

    /// Every bulk submitted so far, in submission order.
    pub fn bulk_log(&self) -> Vec<Vec<BulkOp>> {
        self.bulks.lock().clone()
    }

    /// Raw stored string for a key, bypassing the wrapper.
    pub fn raw_value(&self, key: &str) -> Option<String> {
        self.map.lock().get(key).cloned()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    /// True when no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    /// Make the next `do_bulk` fail without applying anything.
    pub fn fail_next_bulk(&self) {
        self.fail_next_bulk.store(true, Ordering::SeqCst);
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for MemoryDriver {
    fn init(&self) -> PouchResult<()> {
        Ok(())
    }

    fn get(&self, key: &str) -> PouchResult<Option<String>> {
        Ok(self.map.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> PouchResult<()> {
        self.map.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> PouchResult<()> {
        self.map.lock().remove(key);
        Ok(())
    }

    fn do_bulk(&self, ops: &[BulkOp]) -> PouchResult<()> {
        self.bulks.lock().push(ops.to_vec());

        if self.fail_next_bulk.swap(false, Ordering::SeqCst) {
            return Err(PouchError::Driver {
                message: "injected bulk failure".to_string(),
            });
        }

        let mut map = self.map.lock();
        for op in ops {
            match op {
                BulkOp::Set { key, value } => {
                    map.insert(key.clone(), value.clone());
                }
                BulkOp::Remove { key } => {
                    map.remove(key);
                }
            }
        }
        Ok(())
    }

    fn close(&self) -> PouchResult<()> {
        Ok(())
    }
}
