//! Durable commit backends for the Sealer.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use covenant_core::{CommitterKind, CovenantConfig, GitAuthor};
use covenant_ledger::now_timestamp;
use tokio::process::Command;
use tracing::debug;

use crate::cas::{CasStore, CommitRecord, FsCasStore};
use crate::error::{GateError, GateResult};

/// What the Sealer hands a committer after the destination file is written.
#[derive(Debug, Clone, Copy)]
pub struct CommitRequest<'a> {
    /// Canonical repository root.
    pub repo_root: &'a Path,
    /// Destination relative to the root, `/`-separated.
    pub relative_path: &'a str,
    pub content: &'a [u8],
    pub message: &'a str,
}

/// Makes a written destination durable and returns an immutable record id.
#[async_trait]
pub trait Committer: Send + Sync {
    /// Backend name for logs and ledger payloads.
    fn kind(&self) -> &'static str;

    async fn commit(&self, request: CommitRequest<'_>) -> GateResult<String>;

    /// Undo any partial backend state after a failed `commit`.
    async fn abort(&self, _request: CommitRequest<'_>) -> GateResult<()> {
        Ok(())
    }
}

/// Build the committer selected in configuration.
pub fn committer_from_config(config: &CovenantConfig) -> GateResult<Arc<dyn Committer>> {
    Ok(match config.gate.committer {
        CommitterKind::Git => Arc::new(GitCommitter::new(
            config.gate.git_author.clone(),
            config.commit_timeout(),
        )),
        CommitterKind::Cas => Arc::new(CasCommitter::open(
            config.cas_root(),
            config.gate.git_author.name.clone(),
        )?),
    })
}

// ---------------------------------------------------------------------------
// Git
// ---------------------------------------------------------------------------

/// Commits through the `git` CLI with an explicit author identity.
///
/// Only the destination path is committed; anything else staged in the
/// repository's index is left alone.
#[derive(Debug, Clone)]
pub struct GitCommitter {
    author: GitAuthor,
    timeout: Duration,
}

impl GitCommitter {
    pub fn new(author: GitAuthor, timeout: Duration) -> Self {
        Self { author, timeout }
    }

    async fn git(&self, repo: &Path, args: &[&str]) -> GateResult<std::process::Output> {
        let name = format!("user.name={}", self.author.name);
        let email = format!("user.email={}", self.author.email);
        let child = Command::new("git")
            .args(["-c", &name, "-c", &email])
            .args(args)
            .current_dir(repo)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GateError::Git(format!("failed to run git: {e}")))?;

        tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                GateError::Git(format!(
                    "git {} timed out after {}ms",
                    args.first().copied().unwrap_or_default(),
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|e| GateError::Git(format!("git {args:?} failed: {e}")))
    }

    async fn git_ok(&self, repo: &Path, args: &[&str]) -> GateResult<String> {
        let output = self.git(repo, args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GateError::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl Committer for GitCommitter {
    fn kind(&self) -> &'static str {
        "git"
    }

    async fn commit(&self, request: CommitRequest<'_>) -> GateResult<String> {
        let repo = request.repo_root;
        let path = request.relative_path;

        self.git_ok(repo, &["add", "--", path]).await?;

        // `diff --quiet` exits 1 when the path has staged changes.
        let unchanged = self
            .git(repo, &["diff", "--cached", "--quiet", "--", path])
            .await?
            .status
            .success();
        if unchanged {
            debug!(path, "content identical to HEAD, recording empty commit");
            self.git_ok(
                repo,
                &["commit", "--allow-empty", "--only", "-m", request.message],
            )
            .await?;
        } else {
            self.git_ok(repo, &["commit", "--only", "-m", request.message, "--", path])
                .await?;
        }

        let sha = self.git_ok(repo, &["rev-parse", "HEAD"]).await?;
        if sha.is_empty() {
            return Err(GateError::Git(
                "git rev-parse HEAD returned empty output".to_string(),
            ));
        }
        Ok(sha)
    }

    async fn abort(&self, request: CommitRequest<'_>) -> GateResult<()> {
        // Drop whatever `git add` staged for the path; fails harmlessly on an
        // unborn HEAD.
        self.git_ok(request.repo_root, &["reset", "-q", "--", request.relative_path])
            .await
            .map(|_| ())
    }
}

/// Check whether a directory is inside a git work tree.
pub async fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Content-addressed
// ---------------------------------------------------------------------------

/// Commits into a [`FsCasStore`]. The commit id is the SHA-256 of the
/// commit record.
pub struct CasCommitter {
    store: Arc<FsCasStore>,
    root: PathBuf,
    author: String,
}

impl CasCommitter {
    pub fn open(root: impl Into<PathBuf>, author: impl Into<String>) -> GateResult<Self> {
        let root = root.into();
        let store = FsCasStore::new(&root)?;
        Ok(Self {
            store: Arc::new(store),
            root,
            author: author.into(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &FsCasStore {
        &self.store
    }
}

#[async_trait]
impl Committer for CasCommitter {
    fn kind(&self) -> &'static str {
        "cas"
    }

    async fn commit(&self, request: CommitRequest<'_>) -> GateResult<String> {
        let store = Arc::clone(&self.store);
        let content = request.content.to_vec();
        let path = request.relative_path.to_string();
        let message = request.message.to_string();
        let author = self.author.clone();

        let id = tokio::task::spawn_blocking(move || -> GateResult<String> {
            let blob = store.put(&content)?;
            let parent = store.head(&path)?;
            let record = CommitRecord {
                path,
                content: blob,
                message,
                author,
                timestamp: now_timestamp(),
                parent,
            };
            Ok(store.commit(&record)?.to_hex())
        })
        .await
        .map_err(|e| GateError::Io(std::io::Error::other(e.to_string())))??;
        Ok(id)
    }
}
