//! The Evolution Gate: draft, verify, seal behind one closed command set.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use covenant_core::{CommitterKind, CovenantConfig, HaltSignal};
use covenant_ledger::EventLedger;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::committer::{committer_from_config, is_git_repo};
use crate::drafter::Drafter;
use crate::error::GateResult;
use crate::sealer::Sealer;
use crate::verdict::{ProposeResult, SealResult, VerificationVerdict};
use crate::verifier::{Verifier, VerifierSettings};

/// A gate request from external task dispatch.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GateAction {
    Propose {
        #[serde(default)]
        spec: String,
        target_path: PathBuf,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        task_id: Option<String>,
    },
    Verify {
        staging_path: PathBuf,
    },
    Seal {
        staging_path: PathBuf,
        dest_path: PathBuf,
        verdict: VerificationVerdict,
        #[serde(default)]
        message: String,
    },
}

impl GateAction {
    pub fn name(&self) -> &'static str {
        match self {
            GateAction::Propose { .. } => "propose",
            GateAction::Verify { .. } => "verify",
            GateAction::Seal { .. } => "seal",
        }
    }
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GateResponse {
    Propose(ProposeResult),
    Verify(VerificationVerdict),
    Seal(SealResult),
}

pub struct EvolutionGate {
    drafter: Drafter,
    verifier: Verifier,
    sealer: Sealer,
}

impl EvolutionGate {
    pub fn new(drafter: Drafter, verifier: Verifier, sealer: Sealer) -> Self {
        Self {
            drafter,
            verifier,
            sealer,
        }
    }

    /// Wire all three stages from configuration.
    pub async fn from_config(
        config: &CovenantConfig,
        ledger: Arc<dyn EventLedger>,
        halt: Option<HaltSignal>,
    ) -> GateResult<Self> {
        let staging_root = config.staging_root();
        tokio::fs::create_dir_all(&staging_root).await?;

        if config.gate.committer == CommitterKind::Git && !is_git_repo(&config.gate.repo_root).await {
            warn!(
                repo_root = %config.gate.repo_root.display(),
                "repo_root is not a git work tree; seals will fail with git_error"
            );
        }

        let committer = committer_from_config(config)?;
        info!(
            committer = committer.kind(),
            staging_root = %staging_root.display(),
            "evolution gate ready"
        );

        let mut sealer = Sealer::new(ledger, committer, &config.gate.repo_root, &staging_root)
            .with_protected_paths([
                config.ledger.data_dir.clone(),
                config.ledger_path(),
                config.checkpoint_path(),
                config.cas_root(),
            ]);
        if let Some(signal) = halt {
            sealer = sealer.with_halt_signal(signal);
        }

        Ok(Self::new(
            Drafter::new(staging_root),
            Verifier::new(VerifierSettings::from_config(config)),
            sealer,
        ))
    }

    pub fn drafter(&self) -> &Drafter {
        &self.drafter
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    pub fn sealer(&self) -> &Sealer {
        &self.sealer
    }

    pub async fn propose(
        &self,
        spec: &str,
        target_path: &Path,
        content: Option<&str>,
        task_id: Option<&str>,
    ) -> ProposeResult {
        self.drafter
            .propose_for_task(spec, target_path, content, task_id)
            .await
    }

    pub async fn verify(&self, staging_path: &Path) -> VerificationVerdict {
        self.verifier.check(staging_path).await
    }

    pub async fn seal(
        &self,
        staging_path: &Path,
        dest_path: &Path,
        verdict: VerificationVerdict,
        message: &str,
    ) -> SealResult {
        self.sealer
            .seal(staging_path, dest_path, verdict, message)
            .await
    }

    pub async fn dispatch(&self, action: GateAction) -> GateResponse {
        match action {
            GateAction::Propose {
                spec,
                target_path,
                content,
                task_id,
            } => GateResponse::Propose(
                self.propose(&spec, &target_path, content.as_deref(), task_id.as_deref())
                    .await,
            ),
            GateAction::Verify { staging_path } => {
                GateResponse::Verify(self.verify(&staging_path).await)
            }
            GateAction::Seal {
                staging_path,
                dest_path,
                verdict,
                message,
            } => GateResponse::Seal(self.seal(&staging_path, &dest_path, verdict, &message).await),
        }
    }

    /// Run all three stages for one change. Stops at the first stage that
    /// does not succeed and returns what each completed stage produced.
    pub async fn submit(
        &self,
        spec: &str,
        dest_path: &Path,
        content: Option<&str>,
        task_id: Option<&str>,
        message: &str,
    ) -> Submission {
        let proposed = self.propose(spec, dest_path, content, task_id).await;
        let Some(staging_path) = proposed.staging_path.clone() else {
            return Submission {
                proposed,
                failed_verdict: None,
                sealed: None,
            };
        };

        let verdict = self.verify(&staging_path).await;
        if !verdict.passed {
            return Submission {
                proposed,
                failed_verdict: Some(verdict),
                sealed: None,
            };
        }

        let sealed = self.seal(&staging_path, dest_path, verdict, message).await;
        Submission {
            proposed,
            failed_verdict: None,
            sealed: Some(sealed),
        }
    }
}

/// Outcome of [`EvolutionGate::submit`].
#[derive(Debug, Serialize)]
pub struct Submission {
    pub proposed: ProposeResult,
    /// Present when verification failed. A passing verdict is consumed by the
    /// seal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_verdict: Option<VerificationVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sealed: Option<SealResult>,
}

impl Submission {
    pub fn is_sealed(&self) -> bool {
        self.sealed.as_ref().is_some_and(SealResult::is_sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::ProposeStatus;

    #[test]
    fn actions_parse_from_tagged_json() {
        let action: GateAction = serde_json::from_str(
            r#"{"action":"propose","target_path":"src/a.txt","content":"hi\n"}"#,
        )
        .unwrap();
        assert_eq!(action.name(), "propose");
        assert!(matches!(
            action,
            GateAction::Propose { content: Some(ref c), .. } if c == "hi\n"
        ));

        let action: GateAction = serde_json::from_str(
            r#"{"action":"seal","staging_path":"/s/a.txt","dest_path":"a.txt",
                "verdict":{"passed":false,"reason":"x","staging_path":"/s/a.txt"}}"#,
        )
        .unwrap();
        assert_eq!(action.name(), "seal");
    }

    #[test]
    fn unknown_action_is_rejected() {
        let err = serde_json::from_str::<GateAction>(r#"{"action":"merge","path":"x"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn responses_serialize_flat() {
        let response = GateResponse::Propose(ProposeResult::error("no_content", "none"));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["reason"], "no_content");
        assert_eq!(
            serde_json::from_value::<ProposeResult>(json).unwrap().status,
            ProposeStatus::Error
        );
    }
}
