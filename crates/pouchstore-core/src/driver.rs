//! Storage driver contract
//!
//! A driver is any backend exposing the six operations below over raw
//! string values. The wrapper owns caching, buffering and JSON handling;
//! drivers never decode values.
//!
//! `do_bulk` is the critical operation: it must apply the given operations
//! atomically (all-or-nothing) and in order. A driver that cannot provide
//! atomicity weakens the wrapper's flush guarantees and must document it.

use crate::config::Config;
use crate::error::PouchResult;

/// One operation inside a bulk flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkOp {
    /// Insert or update a key with a raw string value
    Set { key: String, value: String },
    /// Delete a key
    Remove { key: String },
}

impl BulkOp {
    /// Key this operation applies to.
    pub fn key(&self) -> &str {
        match self {
            BulkOp::Set { key, .. } => key,
            BulkOp::Remove { key } => key,
        }
    }
}

/// Contract every storage backend must satisfy.
///
/// All methods take `&self`; drivers handle their own interior locking.
/// The wrapper never holds its buffer lock across a driver call.
pub trait Driver: Send + Sync {
    /// Prepare storage. Must complete before any other operation is issued.
    fn init(&self) -> PouchResult<()>;

    /// Return the raw string value for a key, or None if absent.
    fn get(&self, key: &str) -> PouchResult<Option<String>>;

    /// Upsert a raw string value.
    fn set(&self, key: &str, value: &str) -> PouchResult<()>;

    /// Delete a key. Deleting a missing key is not an error.
    fn remove(&self, key: &str) -> PouchResult<()>;

    /// Apply an ordered sequence of operations atomically.
    fn do_bulk(&self, ops: &[BulkOp]) -> PouchResult<()>;

    /// Release resources. No operations may follow.
    fn close(&self) -> PouchResult<()>;

    /// Configuration defaults this driver prefers, if any.
    ///
    /// Caller-supplied overrides beat these; these beat the built-in
    /// defaults. Ephemeral backends typically disable buffering here.
    fn default_config(&self) -> Option<Config> {
        None
    }
}
