//! Error types for graphstore
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! # Categories
//!
//! | Category | Variants | Description |
//! |----------|----------|-------------|
//! | Availability | `StoreUnavailable` | Backend unreachable or store closed |
//! | Validation | `InvalidKey`, `InvalidField` | Malformed input, nothing was sent |
//! | Constraint | `DuplicateKey`, `IndexConflict` | Unique index rules |
//! | Operation | `InvalidOperation` | Update cannot apply to the stored shape |
//! | Batch | `Batch` | Fatal migration/cleanup failure |
//! | System | `Serialization`, `Config` | Infrastructure errors |

use thiserror::Error;

/// Result type alias for graphstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for graphstore
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The backing store cannot be reached, or the handle has been closed
    #[error("store unavailable at {target}: {reason}")]
    StoreUnavailable {
        /// Connection target that failed
        target: String,
        /// Why it is unavailable
        reason: String,
    },

    /// Record key cannot be encoded
    #[error("invalid key: {reason}")]
    InvalidKey {
        /// What is wrong with the key
        reason: String,
    },

    /// Field name cannot be encoded
    #[error("invalid field: {reason}")]
    InvalidField {
        /// What is wrong with the field name
        reason: String,
    },

    /// A write would create a second document under a unique index
    #[error("duplicate key on index {index}: {key}")]
    DuplicateKey {
        /// Index name
        index: String,
        /// Rendered key values
        key: String,
    },

    /// An index with the same name but a different definition exists
    #[error("index {name} already exists with a different definition")]
    IndexConflict {
        /// Index name
        name: String,
    },

    /// Operation cannot be applied to the stored document
    #[error("invalid operation: {reason}")]
    InvalidOperation {
        /// Why the operation was rejected
        reason: String,
    },

    /// Fatal failure of a migration or cleanup run
    #[error("batch operation failed on database {database}: {reason}")]
    Batch {
        /// Database being processed when the failure happened
        database: String,
        /// Underlying failure
        reason: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {reason}")]
    Serialization {
        /// Parser or serializer message
        reason: String,
    },

    /// Configuration file could not be read or written
    #[error("config error: {reason}")]
    Config {
        /// I/O failure detail
        reason: String,
    },
}

impl Error {
    /// Store-unavailable error for `target`
    pub fn unavailable(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::StoreUnavailable {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Malformed record key
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Error::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Malformed field name
    pub fn invalid_field(reason: impl Into<String>) -> Self {
        Error::InvalidField {
            reason: reason.into(),
        }
    }

    /// Rejected update or write
    pub fn invalid_operation(reason: impl Into<String>) -> Self {
        Error::InvalidOperation {
            reason: reason.into(),
        }
    }

    /// Wrap any error as a batch failure on `database`
    pub fn batch(database: impl Into<String>, reason: impl ToString) -> Self {
        Error::Batch {
            database: database.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors caused by caller input rather than the store
    pub fn is_malformed_input(&self) -> bool {
        matches!(self, Error::InvalidKey { .. } | Error::InvalidField { .. })
    }

    /// True when the backend could not be reached
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::StoreUnavailable { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization {
            reason: e.to_string(),
        }
    }
}
