//! Severity, violation, and verification report types.

use std::fmt;
use std::str::FromStr;

use covenant_ledger::Event;
use serde::{Deserialize, Serialize};

use super::error::CovenantError;

/// How a violation is handled downstream.
///
/// Ordered from least to most severe. Severity never affects engine-level
/// pass/fail; it only drives what the Watchdog does with a finding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Recorded only.
    Warning,
    /// Recorded and surfaced in reports; does not halt.
    High,
    /// Halts the Watchdog.
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "WARNING",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Whether a finding of this severity halts the system.
    pub fn halts(&self) -> bool {
        matches!(self, Severity::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = CovenantError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "WARNING" => Ok(Severity::Warning),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(CovenantError::Config(format!("unknown severity: {other}"))),
        }
    }
}

/// The event (or event pair) a violation is attributed to.
///
/// Positions index into the event list that was checked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Evidence {
    Single {
        position: usize,
        event: Event,
    },
    /// `second` is the offending event; `first` is the earlier event it
    /// conflicts with.
    Pair {
        first_position: usize,
        first: Event,
        second_position: usize,
        second: Event,
    },
}

impl Evidence {
    pub fn single(position: usize, event: &Event) -> Self {
        Evidence::Single {
            position,
            event: event.clone(),
        }
    }

    pub fn pair(first_position: usize, first: &Event, second_position: usize, second: &Event) -> Self {
        Evidence::Pair {
            first_position,
            first: first.clone(),
            second_position,
            second: second.clone(),
        }
    }

    /// Position of the offending event.
    pub fn position(&self) -> usize {
        match self {
            Evidence::Single { position, .. } => *position,
            Evidence::Pair {
                second_position, ..
            } => *second_position,
        }
    }

    /// The offending event.
    pub fn event(&self) -> &Event {
        match self {
            Evidence::Single { event, .. } => event,
            Evidence::Pair { second, .. } => second,
        }
    }

    /// Shift every position down by `by`. Positions below `by` saturate at
    /// zero; callers only rebase evidence whose attributed position is at or
    /// past `by`.
    pub(crate) fn rebase(self, by: usize) -> Self {
        match self {
            Evidence::Single { position, event } => Evidence::Single {
                position: position.saturating_sub(by),
                event,
            },
            Evidence::Pair {
                first_position,
                first,
                second_position,
                second,
            } => Evidence::Pair {
                first_position: first_position.saturating_sub(by),
                first,
                second_position: second_position.saturating_sub(by),
                second,
            },
        }
    }
}

/// A single invariant finding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvariantViolation {
    /// Name of the rule that produced this violation.
    pub invariant_name: String,
    pub severity: Severity,
    /// Human-readable explanation.
    pub message: String,
    pub evidence: Evidence,
}

/// Outcome of one batch verification.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VerificationReport {
    /// True iff there are no violations of any severity.
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
    pub events_checked: usize,
}

impl VerificationReport {
    pub fn new(violations: Vec<InvariantViolation>, events_checked: usize) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
            events_checked,
        }
    }

    /// Whether any violation is CRITICAL.
    pub fn has_critical(&self) -> bool {
        self.violations.iter().any(|v| v.severity.halts())
    }

    /// CRITICAL violations in report order.
    pub fn critical(&self) -> impl Iterator<Item = &InvariantViolation> {
        self.violations.iter().filter(|v| v.severity.halts())
    }

    /// Number of violations at exactly `severity`.
    pub fn count(&self, severity: Severity) -> usize {
        self.violations
            .iter()
            .filter(|v| v.severity == severity)
            .count()
    }

    /// Violations produced by the named rule.
    pub fn by_rule<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a InvariantViolation> {
        self.violations
            .iter()
            .filter(move |v| v.invariant_name == name)
    }
}
