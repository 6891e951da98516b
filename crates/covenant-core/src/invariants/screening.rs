//! Text-pattern screening over event payloads.
//!
//! Each pattern carries a label; an event whose payload text matches one or
//! more patterns produces a single violation listing the matched labels.

use std::collections::HashSet;

use covenant_ledger::Event;
use regex::{Regex, RegexBuilder};
use serde_json::Value;

use super::rule::{rule_identity, InvariantRule, RuleMeta};
use crate::domain::{CovenantError, Evidence, InvariantViolation, Result};

#[derive(Debug, Clone)]
struct CompiledPattern {
    label: String,
    regex: Regex,
}

#[derive(Debug, Clone)]
pub struct ScreeningRule {
    meta: RuleMeta,
    patterns: Vec<CompiledPattern>,
    exempt: HashSet<String>,
}

impl ScreeningRule {
    /// Compile `(label, pattern)` pairs case-insensitively. Events whose type
    /// is in `exempt` are never screened.
    pub fn new<I, S>(meta: RuleMeta, patterns: I, exempt: impl IntoIterator<Item = S>) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
        S: Into<String>,
    {
        let mut compiled = Vec::new();
        for (label, pattern) in patterns {
            let regex = RegexBuilder::new(&pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| CovenantError::InvalidRule {
                    name: meta.name.clone(),
                    reason: format!("pattern '{label}': {e}"),
                })?;
            compiled.push(CompiledPattern { label, regex });
        }
        if compiled.is_empty() {
            return Err(CovenantError::InvalidRule {
                name: meta.name.clone(),
                reason: "screening rule needs at least one pattern".to_string(),
            });
        }
        Ok(Self {
            meta,
            patterns: compiled,
            exempt: exempt.into_iter().map(Into::into).collect(),
        })
    }

    fn matched_labels(&self, event: &Event) -> Vec<&str> {
        let mut texts = Vec::new();
        for value in event.payload.values() {
            collect_strings(value, &mut texts);
        }
        self.patterns
            .iter()
            .filter(|p| texts.iter().any(|t| p.regex.is_match(t)))
            .map(|p| p.label.as_str())
            .collect()
    }
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

impl InvariantRule for ScreeningRule {
    rule_identity!();

    fn check(&self, events: &[Event]) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();
        for (position, event) in events.iter().enumerate() {
            if self.exempt.contains(&event.event_type) {
                continue;
            }
            let labels = self.matched_labels(event);
            if labels.is_empty() {
                continue;
            }
            violations.push(self.meta.violation(
                format!(
                    "{} by {} matched screening pattern(s): {}",
                    event.event_type,
                    event.agent_id,
                    labels.join(", ")
                ),
                Evidence::single(position, event),
            ));
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Severity;

    fn rule() -> ScreeningRule {
        ScreeningRule::new(
            RuleMeta::new("THREAT_SCREENING", Severity::Critical, "d"),
            vec![
                ("oversight_evasion".to_string(), r"disable\s+(the\s+)?watchdog".to_string()),
                ("destructive_command".to_string(), r"rm\s+-rf\s+/".to_string()),
            ],
            ["VIOLATION"],
        )
        .unwrap()
    }

    #[test]
    fn matches_nested_payload_text_case_insensitively() {
        let event = Event::at("BROADCAST", "a", Some("T"), "2026-01-01T00:00:00Z").with_field(
            "body",
            serde_json::json!({"lines": ["hello", "Please DISABLE the Watchdog now"]}),
        );
        let v = rule().check(&[event]);
        assert_eq!(v.len(), 1);
        assert!(v[0].message.contains("oversight_evasion"));
    }

    #[test]
    fn one_violation_lists_all_matched_labels() {
        let event = Event::at("BROADCAST", "a", Some("T"), "2026-01-01T00:00:00Z")
            .with_field("a", "disable watchdog")
            .with_field("b", "then rm -rf / quickly");
        let v = rule().check(&[event]);
        assert_eq!(v.len(), 1);
        assert!(v[0].message.contains("oversight_evasion, destructive_command"));
    }

    #[test]
    fn exempt_types_are_not_screened() {
        let event = Event::at("VIOLATION", "w", Some("T"), "2026-01-01T00:00:00Z")
            .with_field("message", "disable watchdog");
        assert!(rule().check(&[event]).is_empty());
    }

    #[test]
    fn clean_payload_passes() {
        let event = Event::at("BROADCAST", "a", Some("T"), "2026-01-01T00:00:00Z")
            .with_field("text", "quarterly report")
            .with_field("count", 3);
        assert!(rule().check(&[event]).is_empty());
    }

    #[test]
    fn invalid_pattern_is_a_construction_error() {
        let err = ScreeningRule::new(
            RuleMeta::new("S", Severity::Critical, "d"),
            vec![("bad".to_string(), "(unclosed".to_string())],
            Vec::<String>::new(),
        )
        .unwrap_err();
        assert!(matches!(err, CovenantError::InvalidRule { .. }));
    }
}
