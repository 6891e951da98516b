//! Result types crossing the gate's public surface.
//!
//! Statuses serialize to the lowercase strings of the gate action contract
//! (`staged`, `sealed`, `rejected`, `git_error`, `io_error`, `error`).

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// The only stamp the Sealer accepts.
pub const VERIFIED_CLEAN: &str = "VERIFIED_CLEAN";

/// Machine-readable reasons attached to verdicts and seal results.
pub mod reasons {
    pub const VERIFIED: &str = "verified";
    pub const STRUCTURAL_CHECK_FAILED: &str = "structural_check_failed";
    pub const STYLE_CHECK_FAILED: &str = "style_check_failed";
    pub const VERIFIER_ERROR: &str = "verifier_error";
    pub const VERIFIER_TIMEOUT: &str = "verifier_timeout";

    pub const VERDICT_NOT_PASSED: &str = "verdict_not_passed";
    pub const MISSING_STAMP: &str = "missing_stamp";
    pub const VERDICT_MISMATCH: &str = "verdict_staging_mismatch";
    pub const CONTENT_CHANGED: &str = "content_digest_mismatch";
    pub const STAGING_INVALID: &str = "staging_invalid";
    pub const PATH_TRAVERSAL: &str = "path_traversal";
    pub const INVALID_DESTINATION: &str = "invalid_destination";
    pub const WRITE_FAILED: &str = "write_failed";
    pub const COMMIT_FAILED: &str = "commit_failed";
    pub const LEDGER_UNAVAILABLE: &str = "ledger_unavailable";
    pub const WATCHDOG_HALTED: &str = "watchdog_halted";
    pub const NO_CONTENT: &str = "no_content";
    pub const INVALID_PROPOSAL: &str = "invalid_proposal";
    pub const STAGING_FAILED: &str = "staging_failed";
}

// ---------------------------------------------------------------------------
// Propose
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposeStatus {
    Staged,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposeResult {
    pub status: ProposeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staging_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ProposeResult {
    pub fn staged(staging_path: PathBuf, proposal_id: String) -> Self {
        Self {
            status: ProposeStatus::Staged,
            staging_path: Some(staging_path),
            proposal_id: Some(proposal_id),
            reason: None,
            details: None,
        }
    }

    pub fn error(reason: &str, details: impl Into<String>) -> Self {
        Self {
            status: ProposeStatus::Error,
            staging_path: None,
            proposal_id: None,
            reason: Some(reason.to_string()),
            details: Some(details.into()),
        }
    }

    pub fn is_staged(&self) -> bool {
        self.status == ProposeStatus::Staged
    }
}

// ---------------------------------------------------------------------------
// Verify
// ---------------------------------------------------------------------------

/// Outcome of verifying one staged file.
///
/// Not `Clone`. [`crate::Sealer::seal`] takes it by value, so each verdict
/// backs at most one seal attempt.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct VerificationVerdict {
    pub passed: bool,
    #[serde(default)]
    pub stamp: Option<String>,
    pub reason: String,
    #[serde(default)]
    pub details: Vec<String>,
    /// Staged file this verdict was issued for.
    pub staging_path: PathBuf,
    /// SHA-256 hex of the bytes that were checked.
    #[serde(default)]
    pub content_digest: Option<String>,
}

impl VerificationVerdict {
    pub fn clean(staging_path: &Path, content_digest: String) -> Self {
        Self {
            passed: true,
            stamp: Some(VERIFIED_CLEAN.to_string()),
            reason: reasons::VERIFIED.to_string(),
            details: Vec::new(),
            staging_path: staging_path.to_path_buf(),
            content_digest: Some(content_digest),
        }
    }

    pub fn failed(
        staging_path: &Path,
        reason: &str,
        details: Vec<String>,
        content_digest: Option<String>,
    ) -> Self {
        Self {
            passed: false,
            stamp: None,
            reason: reason.to_string(),
            details,
            staging_path: staging_path.to_path_buf(),
            content_digest,
        }
    }

    pub fn is_stamped(&self) -> bool {
        self.stamp.as_deref() == Some(VERIFIED_CLEAN)
    }
}

// ---------------------------------------------------------------------------
// Seal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SealStatus {
    Sealed,
    Rejected,
    GitError,
    IoError,
    Error,
}

impl SealStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SealStatus::Sealed => "sealed",
            SealStatus::Rejected => "rejected",
            SealStatus::GitError => "git_error",
            SealStatus::IoError => "io_error",
            SealStatus::Error => "error",
        }
    }
}

impl fmt::Display for SealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealResult {
    pub status: SealStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl SealResult {
    pub fn sealed(commit_id: String) -> Self {
        Self {
            status: SealStatus::Sealed,
            commit_id: Some(commit_id),
            reason: None,
            details: None,
        }
    }

    pub fn failure(status: SealStatus, reason: &str, details: impl Into<String>) -> Self {
        Self {
            status,
            commit_id: None,
            reason: Some(reason.to_string()),
            details: Some(details.into()),
        }
    }

    pub fn with_commit(mut self, commit_id: String) -> Self {
        self.commit_id = Some(commit_id);
        self
    }

    pub fn is_sealed(&self) -> bool {
        self.status == SealStatus::Sealed
    }
}
