//! Covenant-Gate: the Evolution Gate
//!
//! The only sanctioned path for a change to enter governed history:
//!
//! 1. `Drafter` stages content in an isolated proposal directory
//! 2. `Verifier` checks structure and style and issues a verdict
//! 3. `Sealer` enforces the verdict, commits the file, and appends `SEALED`
//!
//! External task dispatch talks to the gate through [`GateAction`] and
//! [`EvolutionGate::dispatch`].

pub mod cas;
pub mod committer;
pub mod drafter;
pub mod error;
pub mod paths;
pub mod pipeline;
pub mod sealer;
pub mod verdict;
pub mod verifier;

pub use committer::{committer_from_config, CasCommitter, CommitRequest, Committer, GitCommitter};
pub use drafter::{ContentSource, Drafter, ProposalManifest};
pub use error::{GateError, GateResult};
pub use pipeline::{EvolutionGate, GateAction, GateResponse, Submission};
pub use sealer::{Sealer, SEALER_AGENT_ID};
pub use verdict::{
    reasons, ProposeResult, ProposeStatus, SealResult, SealStatus, VerificationVerdict,
    VERIFIED_CLEAN,
};
pub use verifier::{Verifier, VerifierSettings};
