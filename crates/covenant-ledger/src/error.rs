//! Error types for covenant-ledger

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in the ledger persistence layer.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The backing store cannot be reached. Callers must treat the governed
    /// action as not having happened.
    #[error("ledger unavailable at {path}: {reason}")]
    Unavailable { path: PathBuf, reason: String },

    /// A ledger operation exceeded its time bound.
    #[error("ledger {operation} timed out after {}ms", elapsed.as_millis())]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    /// A read offset points past the end of the stored ledger.
    #[error("offset {offset} is beyond ledger end {len}")]
    OffsetOutOfRange { offset: u64, len: u64 },

    /// Event serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Generic I/O failure on read paths.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl LedgerError {
    /// Whether this error means the store itself could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            LedgerError::Unavailable { .. } | LedgerError::Timeout { .. }
        )
    }
}
