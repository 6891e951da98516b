//! The `InvariantRule` interface shared by every rule kind.

use std::fmt;

use covenant_ledger::Event;

use crate::domain::{Evidence, InvariantViolation, Severity};

/// A named check over a list of ledger events.
///
/// Rules see the full list handed to the engine and may look at any event
/// to establish precedence, duplication or ordering. Violations must be
/// returned in order of the offending event's position.
pub trait InvariantRule: Send + Sync + fmt::Debug {
    /// Unique rule name (e.g. `NO_DUPLICATE_EVENTS`).
    fn name(&self) -> &str;

    fn severity(&self) -> Severity;

    fn description(&self) -> &str;

    fn check(&self, events: &[Event]) -> Vec<InvariantViolation>;
}

/// Identity shared by every concrete rule.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMeta {
    pub name: String,
    pub severity: Severity,
    pub description: String,
}

impl RuleMeta {
    pub fn new(name: impl Into<String>, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            severity,
            description: description.into(),
        }
    }

    /// Build a violation attributed to this rule.
    pub fn violation(&self, message: impl Into<String>, evidence: Evidence) -> InvariantViolation {
        InvariantViolation {
            invariant_name: self.name.clone(),
            severity: self.severity,
            message: message.into(),
            evidence,
        }
    }
}

/// Implements the identity half of [`InvariantRule`] for a struct with a
/// `meta: RuleMeta` field.
macro_rules! rule_identity {
    () => {
        fn name(&self) -> &str {
            &self.meta.name
        }

        fn severity(&self) -> $crate::domain::Severity {
            self.meta.severity
        }

        fn description(&self) -> &str {
            &self.meta.description
        }
    };
}

pub(crate) use rule_identity;
