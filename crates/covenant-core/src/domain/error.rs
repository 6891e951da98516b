//! Domain-level error taxonomy for Covenant.

use covenant_ledger::LedgerError;

/// Covenant domain errors.
#[derive(Debug, thiserror::Error)]
pub enum CovenantError {
    #[error("duplicate invariant rule name: {0}")]
    DuplicateRule(String),

    #[error("invalid invariant rule {name}: {reason}")]
    InvalidRule { name: String, reason: String },

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for CovenantError {
    fn from(err: toml::de::Error) -> Self {
        CovenantError::Config(err.to_string())
    }
}

/// Result type for Covenant domain operations.
pub type Result<T> = std::result::Result<T, CovenantError>;
