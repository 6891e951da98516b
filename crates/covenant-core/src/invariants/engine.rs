//! Batch evaluation of a rule table over an event list.

use std::collections::HashSet;

use covenant_ledger::Event;
use tracing::debug;

use super::rule::InvariantRule;
use super::table::{standard_rules, RuleSpec};
use crate::domain::{CovenantError, InvariantViolation, Result, VerificationReport};

/// Runs every registered rule against a full event list.
///
/// Rules are fixed at construction. Evaluation is pure: the same input
/// always yields the same report, with rules in registration order and each
/// rule's violations ordered by the offending event's position.
#[derive(Debug)]
pub struct InvariantEngine {
    rules: Vec<Box<dyn InvariantRule>>,
}

impl InvariantEngine {
    /// Engine over the built-in governance table. Fails only if a built-in
    /// screening pattern does not compile.
    pub fn standard() -> Result<Self> {
        Self::from_specs(&standard_rules())
    }

    /// Compile a declarative table. Duplicate names are rejected.
    pub fn from_specs(specs: &[RuleSpec]) -> Result<Self> {
        let mut builder = Self::builder();
        for spec in specs {
            builder = builder.spec(spec)?;
        }
        builder.build()
    }

    pub fn builder() -> InvariantEngineBuilder {
        InvariantEngineBuilder::default()
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate every rule over `events`. `passed` iff no violations of any
    /// severity were found.
    pub fn verify_ledger(&self, events: &[Event]) -> VerificationReport {
        let mut violations = Vec::new();
        for rule in &self.rules {
            let mut found = rule.check(events);
            found.sort_by_key(|v| v.evidence.position());
            debug!(rule = rule.name(), found = found.len(), "rule evaluated");
            violations.extend(found);
        }
        VerificationReport::new(violations, events.len())
    }

    /// Evaluate over `history` followed by `tail`, reporting only violations
    /// attributed to tail events. Positions in the result index into `tail`.
    pub fn verify_with_context(&self, history: &[Event], tail: &[Event]) -> VerificationReport {
        let mut all = Vec::with_capacity(history.len() + tail.len());
        all.extend_from_slice(history);
        all.extend_from_slice(tail);

        let boundary = history.len();
        let full = self.verify_ledger(&all);
        let violations: Vec<InvariantViolation> = full
            .violations
            .into_iter()
            .filter(|v| v.evidence.position() >= boundary)
            .map(|v| InvariantViolation {
                invariant_name: v.invariant_name,
                severity: v.severity,
                message: v.message,
                evidence: v.evidence.rebase(boundary),
            })
            .collect();
        VerificationReport::new(violations, tail.len())
    }
}

/// Builder for [`InvariantEngine`].
#[derive(Debug, Default)]
pub struct InvariantEngineBuilder {
    rules: Vec<Box<dyn InvariantRule>>,
    names: HashSet<String>,
}

impl InvariantEngineBuilder {
    /// Register a rule object.
    pub fn rule(mut self, rule: Box<dyn InvariantRule>) -> Result<Self> {
        if !self.names.insert(rule.name().to_string()) {
            return Err(CovenantError::DuplicateRule(rule.name().to_string()));
        }
        self.rules.push(rule);
        Ok(self)
    }

    /// Compile and register a declarative rule.
    pub fn spec(self, spec: &RuleSpec) -> Result<Self> {
        let rule = spec.build()?;
        self.rule(rule)
    }

    pub fn build(self) -> Result<InvariantEngine> {
        Ok(InvariantEngine { rules: self.rules })
    }
}
