//! The single enforcement point between a verdict and governed history.
//!
//! A seal either ends with a `SEALED` ledger event carrying the commit id, or
//! with a typed non-`sealed` status. Policy rejections (`rejected`) and
//! infrastructure faults (`io_error`, `git_error`, `error`) are never
//! conflated.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use covenant_core::{obs, Attestable, HaltSignal, METRICS};
use covenant_ledger::{event_types, Event, EventLedger};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, error, warn, Instrument};

use crate::cas::digest_hex;
use crate::committer::{CommitRequest, Committer};
use crate::drafter::ProposalManifest;
use crate::error::{GateError, GateResult};
use crate::paths::resolve_destination;
use crate::verdict::{reasons, SealResult, SealStatus, VerificationVerdict, VERIFIED_CLEAN};

pub const SEALER_AGENT_ID: &str = "covenant.sealer";

/// A staged file confirmed to live inside the staging root.
struct StagedFile {
    path: PathBuf,
    root: PathBuf,
    bytes: Vec<u8>,
}

pub struct Sealer {
    ledger: Arc<dyn EventLedger>,
    committer: Arc<dyn Committer>,
    repo_root: PathBuf,
    staging_root: PathBuf,
    protected: Vec<PathBuf>,
    halt: Option<HaltSignal>,
    agent_id: String,
}

impl Sealer {
    pub fn new(
        ledger: Arc<dyn EventLedger>,
        committer: Arc<dyn Committer>,
        repo_root: impl Into<PathBuf>,
        staging_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ledger,
            committer,
            repo_root: repo_root.into(),
            staging_root: staging_root.into(),
            protected: Vec::new(),
            halt: None,
            agent_id: SEALER_AGENT_ID.to_string(),
        }
    }

    /// Refuse to seal once this signal is tripped.
    pub fn with_halt_signal(mut self, signal: HaltSignal) -> Self {
        self.halt = Some(signal);
        self
    }

    /// Never write at or below any of these paths, e.g. the ledger data
    /// directory when it lives inside the repository. The staging root is
    /// always protected.
    pub fn with_protected_paths(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.protected.extend(paths);
        self
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    pub fn committer(&self) -> &dyn Committer {
        self.committer.as_ref()
    }

    /// Move a verified staged file to `dest_path`, commit it and record
    /// `SEALED`. Consumes the verdict.
    pub async fn seal(
        &self,
        staging_path: &Path,
        dest_path: &Path,
        verdict: VerificationVerdict,
        message: &str,
    ) -> SealResult {
        let dest_display = dest_path.display().to_string();
        let result = self
            .seal_inner(staging_path, dest_path, verdict, message)
            .instrument(obs::seal_span(&dest_display))
            .await;
        obs::emit_seal_outcome(
            &dest_display,
            result.status.as_str(),
            result.reason.as_deref(),
            result.commit_id.as_deref(),
        );
        result
    }

    async fn seal_inner(
        &self,
        staging_path: &Path,
        dest_path: &Path,
        verdict: VerificationVerdict,
        message: &str,
    ) -> SealResult {
        if self.halt.as_ref().is_some_and(HaltSignal::is_halted) {
            return SealResult::failure(
                SealStatus::Error,
                reasons::WATCHDOG_HALTED,
                "watchdog has halted; no changes are sealed until an operator intervenes",
            );
        }

        // Only trust a manifest that sits inside the staging root.
        let manifest = match self.confine_staged(staging_path).await {
            Ok((root, path)) if proposal_dir_of(&path, &root).is_some() => {
                ProposalManifest::for_staged_file(&path).await
            }
            _ => None,
        };
        let task_id = manifest
            .as_ref()
            .map(|m| m.task_id.clone())
            .unwrap_or_else(|| format!("seal:{}", dest_path.display()));

        if let Some((reason, details)) = policy_violation(staging_path, &verdict) {
            return self
                .reject(&task_id, staging_path, dest_path, &verdict, reason, details)
                .await;
        }

        let staged = match self.read_staged(staging_path).await {
            Ok(staged) => staged,
            Err(e) => {
                return SealResult::failure(SealStatus::Error, reasons::STAGING_INVALID, e.to_string())
            }
        };
        let digest = digest_hex(&staged.bytes);
        if verdict.content_digest.as_deref() != Some(digest.as_str()) {
            let details = format!(
                "staged content hashes to {digest}, verdict covers {}",
                verdict.content_digest.as_deref().unwrap_or("no content")
            );
            return self
                .reject(
                    &task_id,
                    staging_path,
                    dest_path,
                    &verdict,
                    reasons::CONTENT_CHANGED,
                    details,
                )
                .await;
        }

        let mut protected = self.protected.clone();
        protected.push(self.staging_root.clone());
        let dest = match resolve_destination(&self.repo_root, dest_path, &protected) {
            Ok(dest) => dest,
            Err(e @ GateError::PathTraversal { .. }) => {
                warn!(dest = %dest_path.display(), "destination escapes repository root");
                return SealResult::failure(SealStatus::Error, reasons::PATH_TRAVERSAL, e.to_string());
            }
            Err(e @ GateError::InvalidDestination { .. }) => {
                return SealResult::failure(
                    SealStatus::Error,
                    reasons::INVALID_DESTINATION,
                    e.to_string(),
                )
            }
            Err(e) => {
                return SealResult::failure(SealStatus::IoError, reasons::WRITE_FAILED, e.to_string())
            }
        };

        let backup = match read_existing(&dest.absolute).await {
            Ok(backup) => backup,
            Err(e) => {
                return SealResult::failure(SealStatus::IoError, reasons::WRITE_FAILED, e.to_string())
            }
        };
        if let Err(e) = write_atomic(dest.absolute.clone(), staged.bytes.clone()).await {
            return SealResult::failure(SealStatus::IoError, reasons::WRITE_FAILED, e.to_string());
        }

        let relative = dest.display_relative();
        let request = CommitRequest {
            repo_root: &dest.root,
            relative_path: &relative,
            content: &staged.bytes,
            message,
        };
        let commit_id = match self.committer.commit(request).await {
            Ok(id) => id,
            Err(e) => {
                if let Err(abort_err) = self.committer.abort(request).await {
                    debug!(error = %abort_err, "committer abort failed");
                }
                if let Err(restore_err) = restore(&dest.absolute, backup).await {
                    error!(
                        dest = %dest.absolute.display(),
                        error = %restore_err,
                        "could not restore destination after failed commit"
                    );
                }
                return SealResult::failure(SealStatus::GitError, reasons::COMMIT_FAILED, e.to_string());
            }
        };

        let event = Event::new(
            event_types::SEALED,
            &self.agent_id,
            Some(task_id),
            Map::new(),
        )
        .with_field("commit_id", commit_id.as_str())
        .with_field("dest_path", relative.as_str())
        .with_field("verdict", serde_json::to_value(&verdict).unwrap_or(Value::Null))
        .with_field("message", message)
        .with_field("content_digest", digest)
        .with_field("committer", self.committer.kind())
        .with_field("attested_by", self.attest().digest);

        if let Err(e) = self.ledger.append(&event).await {
            error!(
                commit_id = %commit_id,
                dest = %relative,
                error = %e,
                "commit is durable but SEALED was not recorded"
            );
            return SealResult::failure(SealStatus::Error, reasons::LEDGER_UNAVAILABLE, e.to_string())
                .with_commit(commit_id);
        }

        self.clear_staging(&staged, manifest.is_some()).await;
        METRICS.inc_seals_committed();
        SealResult::sealed(commit_id)
    }

    async fn reject(
        &self,
        task_id: &str,
        staging_path: &Path,
        dest_path: &Path,
        verdict: &VerificationVerdict,
        reason: &'static str,
        details: String,
    ) -> SealResult {
        METRICS.inc_seals_rejected();
        let event = Event::new(
            event_types::SEAL_REJECTED,
            &self.agent_id,
            Some(task_id.to_string()),
            Map::new(),
        )
        .with_field("reason", reason)
        .with_field("details", details.as_str())
        .with_field("staging_path", staging_path.display().to_string())
        .with_field("dest_path", dest_path.display().to_string())
        .with_field("verdict_reason", verdict.reason.as_str());
        if let Err(e) = self.ledger.append(&event).await {
            warn!(error = %e, reason, "could not record seal rejection");
        }
        SealResult::failure(SealStatus::Rejected, reason, details)
    }

    /// Canonical staging root and staged path, or an error when the path
    /// resolves outside the root.
    async fn confine_staged(&self, staging_path: &Path) -> GateResult<(PathBuf, PathBuf)> {
        let root = tokio::fs::canonicalize(&self.staging_root).await?;
        let path = tokio::fs::canonicalize(staging_path).await?;
        if !path.starts_with(&root) {
            return Err(GateError::PathTraversal {
                path: staging_path.to_path_buf(),
                root,
            });
        }
        Ok((root, path))
    }

    async fn read_staged(&self, staging_path: &Path) -> GateResult<StagedFile> {
        let (root, path) = self.confine_staged(staging_path).await?;
        if !tokio::fs::metadata(&path).await?.is_file() {
            return Err(GateError::InvalidProposal(format!(
                "{} is not a regular file",
                staging_path.display()
            )));
        }
        let bytes = tokio::fs::read(&path).await?;
        Ok(StagedFile { path, root, bytes })
    }

    /// Remove the proposal directory, or just the staged file when it was not
    /// laid out by a Drafter.
    async fn clear_staging(&self, staged: &StagedFile, drafted: bool) {
        let proposal_dir = proposal_dir_of(&staged.path, &staged.root).filter(|_| drafted);
        let result = match proposal_dir {
            Some(dir) => tokio::fs::remove_dir_all(dir).await,
            None => tokio::fs::remove_file(&staged.path).await,
        };
        if let Err(e) = result {
            warn!(path = %staged.path.display(), error = %e, "could not clear staging");
        }
    }
}

/// The per-proposal directory holding `path`, when it lies strictly inside
/// `root`.
fn proposal_dir_of<'a>(path: &'a Path, root: &Path) -> Option<&'a Path> {
    path.parent()
        .and_then(Path::parent)
        .filter(|dir| dir.starts_with(root) && *dir != root)
}

/// Policy checks that need nothing but the verdict.
fn policy_violation(
    staging_path: &Path,
    verdict: &VerificationVerdict,
) -> Option<(&'static str, String)> {
    if !verdict.passed {
        return Some((
            reasons::VERDICT_NOT_PASSED,
            format!("verdict did not pass: {}", verdict.reason),
        ));
    }
    if !verdict.is_stamped() {
        return Some((
            reasons::MISSING_STAMP,
            format!(
                "stamp {:?} is not {VERIFIED_CLEAN}",
                verdict.stamp.as_deref().unwrap_or("")
            ),
        ));
    }
    if !same_path(&verdict.staging_path, staging_path) {
        return Some((
            reasons::VERDICT_MISMATCH,
            format!(
                "verdict was issued for {}, not {}",
                verdict.staging_path.display(),
                staging_path.display()
            ),
        ));
    }
    None
}

fn same_path(a: &Path, b: &Path) -> bool {
    a == b || matches!((a.canonicalize(), b.canonicalize()), (Ok(x), Ok(y)) if x == y)
}

async fn read_existing(path: &Path) -> GateResult<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_atomic(dest: PathBuf, content: Vec<u8>) -> GateResult<()> {
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let parent = dest
            .parent()
            .ok_or_else(|| std::io::Error::other("destination has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(&content)?;
        tmp.as_file().sync_data()?;
        tmp.persist(&dest).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| std::io::Error::other(e.to_string()))??;
    Ok(())
}

async fn restore(path: &Path, backup: Option<Vec<u8>>) -> GateResult<()> {
    match backup {
        Some(bytes) => write_atomic(path.to_path_buf(), bytes).await,
        None => match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        },
    }
}

impl Attestable for Sealer {
    fn component_id(&self) -> &str {
        "covenant.sealer"
    }

    fn commitments(&self) -> Vec<String> {
        let mut commitments = vec![
            "rejects verdicts that did not pass".to_string(),
            format!("requires stamp {VERIFIED_CLEAN}"),
            "binds each verdict to the staged content digest".to_string(),
            "confines destinations to the repository root".to_string(),
            "never writes governance state".to_string(),
            format!("commits via {}", self.committer.kind()),
        ];
        if self.halt.is_some() {
            commitments.push("refuses to seal after a watchdog halt".to_string());
        }
        commitments
    }
}
