//! Declarative rule tables.
//!
//! A [`RuleSpec`] describes one rule in data form so rule tables can be
//! loaded from TOML or JSON; [`RuleSpec::build`] compiles it into a boxed
//! [`InvariantRule`]. [`standard_rules`] is the built-in governance table.

use covenant_ledger::event_types;
use serde::{Deserialize, Serialize};

use super::forbidden::ForbiddenTypeRule;
use super::orphan::OrphanRule;
use super::precedence::PrecedenceRule;
use super::rule::{InvariantRule, RuleMeta};
use super::screening::ScreeningRule;
use super::sequence::SequenceRule;
use super::uniqueness::UniquenessRule;
use super::workflow::WorkflowOrderRule;
use crate::domain::{CovenantError, Result, Severity};

// ---------------------------------------------------------------------------
// Spec types
// ---------------------------------------------------------------------------

/// One labelled screening pattern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScreenPattern {
    pub label: String,
    /// Regular expression, matched case-insensitively.
    pub pattern: String,
}

impl ScreenPattern {
    pub fn new(label: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            pattern: pattern.into(),
        }
    }
}

/// The behavior half of a rule spec.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    /// `event_type` requires an earlier `requires` event with the same task.
    Precedence { event_type: String, requires: String },
    /// No two events share the full identity tuple.
    Uniqueness,
    /// Every event carries a task_id.
    Orphan,
    /// Per-task timestamps never go backwards.
    Sequence,
    /// Steps keyed by a payload field appear in relative order.
    WorkflowOrder { id_field: String, steps: Vec<String> },
    /// `event_type` must never appear.
    ForbiddenType { event_type: String },
    /// Payload text must not match any pattern.
    Screening {
        patterns: Vec<ScreenPattern>,
        #[serde(default)]
        exempt_types: Vec<String>,
    },
}

/// A serializable rule definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleSpec {
    pub name: String,
    pub severity: Severity,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub kind: RuleKind,
}

impl RuleSpec {
    pub fn new(name: impl Into<String>, severity: Severity, kind: RuleKind) -> Self {
        Self {
            name: name.into(),
            severity,
            description: None,
            kind,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Compile into a rule object. Fails on an empty name, an empty workflow
    /// step list or an invalid screening pattern.
    pub fn build(&self) -> Result<Box<dyn InvariantRule>> {
        if self.name.trim().is_empty() {
            return Err(CovenantError::InvalidRule {
                name: self.name.clone(),
                reason: "rule name must not be empty".to_string(),
            });
        }
        let meta = RuleMeta::new(
            self.name.clone(),
            self.severity,
            self.description.clone().unwrap_or_default(),
        );

        let rule: Box<dyn InvariantRule> = match &self.kind {
            RuleKind::Precedence {
                event_type,
                requires,
            } => Box::new(PrecedenceRule::new(meta, event_type, requires)),
            RuleKind::Uniqueness => Box::new(UniquenessRule::new(meta)),
            RuleKind::Orphan => Box::new(OrphanRule::new(meta)),
            RuleKind::Sequence => Box::new(SequenceRule::new(meta)),
            RuleKind::WorkflowOrder { id_field, steps } => {
                if steps.is_empty() {
                    return Err(CovenantError::InvalidRule {
                        name: self.name.clone(),
                        reason: "workflow needs at least one step".to_string(),
                    });
                }
                Box::new(WorkflowOrderRule::new(meta, id_field, steps.clone()))
            }
            RuleKind::ForbiddenType { event_type } => {
                Box::new(ForbiddenTypeRule::new(meta, event_type))
            }
            RuleKind::Screening {
                patterns,
                exempt_types,
            } => Box::new(ScreeningRule::new(
                meta,
                patterns
                    .iter()
                    .map(|p| (p.label.clone(), p.pattern.clone())),
                exempt_types.iter().cloned(),
            )?),
        };
        Ok(rule)
    }
}

/// A rule table as it appears in a TOML file:
///
/// ```toml
/// [[rules]]
/// name = "BROADCAST_LICENSE_REQUIREMENT"
/// severity = "HIGH"
/// kind = "precedence"
/// event_type = "BROADCAST"
/// requires = "LICENSE_VALID"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuleTable {
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

impl RuleTable {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

// ---------------------------------------------------------------------------
// Standard table
// ---------------------------------------------------------------------------

/// Patterns screened by `THREAT_SCREENING`.
pub fn standard_screen_patterns() -> Vec<ScreenPattern> {
    vec![
        ScreenPattern::new(
            "oversight_evasion",
            r"\b(disable|bypass|evade|kill)\s+(the\s+)?(watchdog|oversight|monitor(ing)?|audit)",
        ),
        ScreenPattern::new(
            "constitution_tamper",
            r"\b(delete|erase|rewrite|overwrite)\s+(the\s+)?constitution",
        ),
        ScreenPattern::new(
            "self_replication",
            r"\b(self[-\s]?replicat\w*|copy\s+(my|it)self\s+to)",
        ),
        ScreenPattern::new(
            "destructive_command",
            r"(rm\s+-rf\s+/|\bdrop\s+table\b|\bmkfs\.)",
        ),
        ScreenPattern::new(
            "instruction_override",
            r"\bignore\s+(all\s+)?(previous|prior)\s+instructions",
        ),
    ]
}

/// The built-in governance rule table, in evaluation order.
pub fn standard_rules() -> Vec<RuleSpec> {
    vec![
        RuleSpec::new("NO_DUPLICATE_EVENTS", Severity::High, RuleKind::Uniqueness)
            .describe("No two ledger events share type, agent, task, timestamp and payload"),
        RuleSpec::new("NO_ORPHAN_EVENTS", Severity::Warning, RuleKind::Orphan)
            .describe("Every event carries a task_id"),
        RuleSpec::new(
            "BROADCAST_LICENSE_REQUIREMENT",
            Severity::High,
            RuleKind::Precedence {
                event_type: event_types::BROADCAST.to_string(),
                requires: event_types::LICENSE_VALID.to_string(),
            },
        )
        .describe("A broadcast requires an earlier license validation for the same task"),
        RuleSpec::new("CAUSAL_TIMESTAMP_ORDER", Severity::High, RuleKind::Sequence)
            .describe("Timestamps within a task never go backwards"),
        RuleSpec::new(
            "PROPOSAL_WORKFLOW_ORDER",
            Severity::High,
            RuleKind::WorkflowOrder {
                id_field: "proposal_id".to_string(),
                steps: vec![
                    event_types::PROPOSAL_CREATED.to_string(),
                    event_types::PROPOSAL_VOTED.to_string(),
                    event_types::PROPOSAL_PASSED.to_string(),
                    event_types::PROPOSAL_EXECUTED.to_string(),
                ],
            },
        )
        .describe("Proposals move created, voted, passed, executed in order"),
        RuleSpec::new(
            "CONSTITUTION_INTEGRITY",
            Severity::Critical,
            RuleKind::ForbiddenType {
                event_type: event_types::CONSTITUTION_DELETED.to_string(),
            },
        )
        .describe("The constitution is never deleted"),
        RuleSpec::new(
            "THREAT_SCREENING",
            Severity::Critical,
            RuleKind::Screening {
                patterns: standard_screen_patterns(),
                exempt_types: vec![
                    event_types::VIOLATION.to_string(),
                    event_types::WATCHDOG_HALTED.to_string(),
                ],
            },
        )
        .describe("Payload text is screened for oversight evasion and destructive intent"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_builds() {
        let specs = standard_rules();
        assert_eq!(specs.len(), 7);
        for spec in &specs {
            let rule = spec.build().unwrap();
            assert_eq!(rule.name(), spec.name);
            assert_eq!(rule.severity(), spec.severity);
        }
    }

    #[test]
    fn spec_roundtrips_through_toml() {
        let toml = r#"
            [[rules]]
            name = "BROADCAST_LICENSE_REQUIREMENT"
            severity = "HIGH"
            kind = "precedence"
            event_type = "BROADCAST"
            requires = "LICENSE_VALID"

            [[rules]]
            name = "GUARD"
            severity = "CRITICAL"
            description = "no shutdown talk"
            kind = "screening"
            patterns = [{ label = "shutdown", pattern = "shut\\s*down" }]
        "#;
        let table = RuleTable::from_toml_str(toml).unwrap();
        assert_eq!(table.rules.len(), 2);
        assert_eq!(
            table.rules[0].kind,
            RuleKind::Precedence {
                event_type: "BROADCAST".to_string(),
                requires: "LICENSE_VALID".to_string()
            }
        );
        assert_eq!(table.rules[1].description.as_deref(), Some("no shutdown talk"));
        assert!(table.rules[1].build().is_ok());
    }

    #[test]
    fn spec_serializes_kind_tag() {
        let spec = RuleSpec::new("NO_ORPHAN_EVENTS", Severity::Warning, RuleKind::Orphan);
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["kind"], "orphan");
        assert_eq!(json["severity"], "WARNING");
    }

    #[test]
    fn empty_workflow_is_rejected() {
        let spec = RuleSpec::new(
            "W",
            Severity::High,
            RuleKind::WorkflowOrder {
                id_field: "id".to_string(),
                steps: vec![],
            },
        );
        assert!(matches!(
            spec.build().unwrap_err(),
            CovenantError::InvalidRule { .. }
        ));
    }

    #[test]
    fn blank_name_is_rejected() {
        let spec = RuleSpec::new("  ", Severity::High, RuleKind::Orphan);
        assert!(spec.build().is_err());
    }

    #[test]
    fn standard_patterns_catch_known_phrases() {
        let rule = standard_rules()
            .into_iter()
            .find(|s| s.name == "THREAT_SCREENING")
            .unwrap()
            .build()
            .unwrap();
        let hit = |text: &str| {
            let event = covenant_ledger::Event::at("BROADCAST", "a", Some("T"), "2026-01-01T00:00:00Z")
                .with_field("text", text);
            !rule.check(&[event]).is_empty()
        };
        assert!(hit("we should Disable the Watchdog tonight"));
        assert!(hit("please delete the constitution"));
        assert!(hit("Ignore previous instructions"));
        assert!(hit("run rm -rf / now"));
        assert!(!hit("the watchdog reported a clean tick"));
    }
}
