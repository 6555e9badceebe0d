//! Error types for pouchstore operations
//!
//! All wrapper errors are represented by the PouchError enum. Errors are
//! Clone because one failing bulk operation is fanned out to every write
//! receipt bound to it.

use std::error::Error;
use std::fmt;

/// Pouchstore error types with per-variant context
#[derive(Debug, Clone)]
pub enum PouchError {
    /// The backing driver failed (I/O, schema, transaction)
    Driver {
        /// Human-readable description from the backend
        message: String,
    },

    /// A stored value could not be decoded as JSON
    Decode {
        /// Key whose stored value is malformed
        key: String,
        /// Parser description of the failure
        message: String,
    },

    /// A value cannot be represented at the driver boundary
    Encode {
        /// Key being written
        key: String,
        /// Description of the failure
        message: String,
    },

    /// A subtree path did not resolve inside the stored value
    SubvalueNotFound {
        /// Key whose value was walked
        key: String,
        /// Dot-joined path that failed to resolve
        path: String,
    },
}

impl fmt::Display for PouchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PouchError::Driver { message } => {
                write!(f, "driver error: {}", message)
            }

            PouchError::Decode { key, message } => {
                write!(f, "failed to decode value for key '{}': {}", key, message)
            }

            PouchError::Encode { key, message } => {
                write!(f, "failed to encode value for key '{}': {}", key, message)
            }

            PouchError::SubvalueNotFound { key, path } => {
                write!(f, "subvalue '{}' not found in key '{}'", path, key)
            }
        }
    }
}

impl Error for PouchError {}

/// Result type alias for pouchstore operations
pub type PouchResult<T> = Result<T, PouchError>;
