//! Component attestation.
//!
//! A component states the commitments it enforces; the attestation digest
//! binds those commitments to the component id so ledger readers can tell
//! which rules were in force when an action was taken.

use covenant_ledger::{event_types, Event, EventLedger};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::domain::Result;
use crate::metrics::METRICS;
use crate::obs;

/// A published statement of what a component guarantees.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attestation {
    pub component_id: String,
    pub commitments: Vec<String>,
    /// SHA-256 hex over the component id and commitments.
    pub digest: String,
}

impl Attestation {
    pub fn new(component_id: impl Into<String>, commitments: Vec<String>) -> Self {
        let component_id = component_id.into();
        let digest = attestation_digest(&component_id, &commitments);
        Self {
            component_id,
            commitments,
            digest,
        }
    }

    /// Recompute the digest and compare.
    pub fn verify(&self) -> bool {
        attestation_digest(&self.component_id, &self.commitments) == self.digest
    }
}

fn attestation_digest(component_id: &str, commitments: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(component_id.as_bytes());
    for c in commitments {
        // Separator keeps ["ab","c"] distinct from ["a","bc"].
        hasher.update([0u8]);
        hasher.update(c.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Implemented by every governance component that publishes commitments.
pub trait Attestable: Send + Sync {
    fn component_id(&self) -> &str;

    fn commitments(&self) -> Vec<String>;

    fn attest(&self) -> Attestation {
        Attestation::new(self.component_id(), self.commitments())
    }
}

/// Append an `ATTESTATION` event for `component` and return the attestation.
pub async fn record_attestation(
    ledger: &dyn EventLedger,
    component: &dyn Attestable,
    agent_id: &str,
) -> Result<Attestation> {
    let attestation = component.attest();
    let mut payload = Map::new();
    payload.insert(
        "component_id".to_string(),
        Value::String(attestation.component_id.clone()),
    );
    payload.insert(
        "commitments".to_string(),
        Value::from(attestation.commitments.clone()),
    );
    payload.insert("digest".to_string(), Value::String(attestation.digest.clone()));

    let event = Event::new(
        event_types::ATTESTATION,
        agent_id,
        Some(format!("attestation:{}", attestation.component_id)),
        payload,
    );
    ledger.append(&event).await?;

    METRICS.inc_attestations();
    obs::emit_attestation(&attestation.component_id, &attestation.digest);
    Ok(attestation)
}
