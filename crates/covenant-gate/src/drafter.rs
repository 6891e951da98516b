//! Stage proposed content in an isolated per-proposal directory.
//!
//! Layout for one proposal:
//!
//! ```text
//! <staging_root>/<proposal_id>/manifest.json
//! <staging_root>/<proposal_id>/content/<file name of target_path>
//! ```
//!
//! The staged file keeps the target's file name so the Verifier can pick
//! checks by extension. Nothing is written to the destination and no ledger
//! event is emitted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use covenant_core::{obs, Attestable};
use covenant_ledger::now_timestamp;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::cas::digest_hex;
use crate::error::{GateError, GateResult};
use crate::verdict::{reasons, ProposeResult};

pub const MANIFEST_FILE: &str = "manifest.json";
const CONTENT_DIR: &str = "content";

/// Produces file content from a free-text spec when the caller supplies none.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn generate(&self, spec: &str, target_path: &Path) -> GateResult<String>;
}

/// Metadata written beside each staged file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalManifest {
    pub proposal_id: String,
    /// Correlation key carried onto every ledger event for this change.
    pub task_id: String,
    pub spec: String,
    pub target_path: PathBuf,
    pub content_digest: String,
    pub created_at: String,
}

impl ProposalManifest {
    /// Read the manifest for a staged file, if it was staged by a Drafter.
    pub async fn for_staged_file(staging_path: &Path) -> Option<Self> {
        let proposal_dir = staging_path.parent()?.parent()?;
        let bytes = tokio::fs::read(proposal_dir.join(MANIFEST_FILE)).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

pub struct Drafter {
    staging_root: PathBuf,
    source: Option<Arc<dyn ContentSource>>,
}

impl Drafter {
    pub fn new(staging_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn ContentSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    /// Stage `content` (or generated content) for `target_path`.
    pub async fn propose(
        &self,
        spec: &str,
        target_path: &Path,
        content: Option<&str>,
    ) -> ProposeResult {
        self.propose_for_task(spec, target_path, content, None).await
    }

    /// As [`Drafter::propose`], correlating the proposal with an external
    /// task. Without one, the task id is `proposal:<proposal_id>`.
    pub async fn propose_for_task(
        &self,
        spec: &str,
        target_path: &Path,
        content: Option<&str>,
        task_id: Option<&str>,
    ) -> ProposeResult {
        match self.stage(spec, target_path, content, task_id).await {
            Ok((path, id)) => {
                obs::emit_proposal_staged(
                    &path.display().to_string(),
                    &target_path.display().to_string(),
                );
                ProposeResult::staged(path, id)
            }
            Err(e) => {
                warn!(target = %target_path.display(), error = %e, "proposal not staged");
                let reason = match e {
                    GateError::NoContent | GateError::ContentSource(_) => reasons::NO_CONTENT,
                    GateError::InvalidProposal(_) => reasons::INVALID_PROPOSAL,
                    _ => reasons::STAGING_FAILED,
                };
                ProposeResult::error(reason, e.to_string())
            }
        }
    }

    async fn stage(
        &self,
        spec: &str,
        target_path: &Path,
        content: Option<&str>,
        task_id: Option<&str>,
    ) -> GateResult<(PathBuf, String)> {
        let file_name = target_path
            .file_name()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                GateError::InvalidProposal(format!(
                    "target path {} has no file name",
                    target_path.display()
                ))
            })?
            .to_owned();

        let content = match (content, &self.source) {
            (Some(text), _) => text.to_string(),
            (None, Some(source)) => source
                .generate(spec, target_path)
                .await
                .map_err(|e| GateError::ContentSource(e.to_string()))?,
            (None, None) => return Err(GateError::NoContent),
        };

        let proposal_id = Uuid::new_v4().to_string();
        let proposal_dir = self.staging_root.join(&proposal_id);
        let content_dir = proposal_dir.join(CONTENT_DIR);
        tokio::fs::create_dir_all(&content_dir).await?;

        let staged = content_dir.join(&file_name);
        tokio::fs::write(&staged, content.as_bytes()).await?;

        let manifest = ProposalManifest {
            proposal_id: proposal_id.clone(),
            task_id: task_id
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(ToString::to_string)
                .unwrap_or_else(|| format!("proposal:{proposal_id}")),
            spec: spec.to_string(),
            target_path: target_path.to_path_buf(),
            content_digest: digest_hex(content.as_bytes()),
            created_at: now_timestamp(),
        };
        tokio::fs::write(
            proposal_dir.join(MANIFEST_FILE),
            serde_json::to_vec_pretty(&manifest)?,
        )
        .await?;

        Ok((staged, proposal_id))
    }
}

impl Attestable for Drafter {
    fn component_id(&self) -> &str {
        "covenant.drafter"
    }

    fn commitments(&self) -> Vec<String> {
        vec![
            "writes only inside the staging root".to_string(),
            "one isolated directory per proposal".to_string(),
        ]
    }
}
