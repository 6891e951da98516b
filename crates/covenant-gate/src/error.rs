//! Error types for the Evolution Gate.

use std::path::PathBuf;

use covenant_core::CovenantError;
use covenant_ledger::LedgerError;

use crate::cas::CasError;

/// Errors produced inside the gate.
///
/// These never cross the gate's public surface as `Err`: `propose`, `check`
/// and `seal` fold them into typed statuses and reasons.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("invalid proposal: {0}")]
    InvalidProposal(String),

    #[error("no content supplied and no content source configured")]
    NoContent,

    #[error("content source failed: {0}")]
    ContentSource(String),

    #[error("path traversal: {} resolves outside {}", path.display(), root.display())]
    PathTraversal { path: PathBuf, root: PathBuf },

    #[error("invalid destination {}: {reason}", path.display())]
    InvalidDestination { path: PathBuf, reason: String },

    #[error("git error: {0}")]
    Git(String),

    #[error("cas error: {0}")]
    Cas(#[from] CasError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Core(#[from] CovenantError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for gate operations.
pub type GateResult<T> = std::result::Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_error_names_both_paths() {
        let err = GateError::PathTraversal {
            path: PathBuf::from("../../etc/passwd"),
            root: PathBuf::from("/srv/repo"),
        };
        let text = err.to_string();
        assert!(text.contains("../../etc/passwd"));
        assert!(text.contains("/srv/repo"));
    }

    #[test]
    fn ledger_error_converts() {
        let err: GateError = LedgerError::Serialization("bad".into()).into();
        assert!(matches!(err, GateError::Ledger(_)));
    }
}
