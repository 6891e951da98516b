use std::collections::HashMap;

use covenant_ledger::Event;
use serde_json::Value;

use super::rule::{rule_identity, InvariantRule, RuleMeta};
use crate::domain::{Evidence, InvariantViolation};

#[derive(Debug, Default)]
struct Progress {
    seen: Vec<bool>,
    furthest: Option<usize>,
}

/// A multi-step workflow whose steps must appear in a fixed relative order
/// per workflow instance.
///
/// Instances are keyed by the payload field `id_field`. For each step event:
/// every earlier step must already have been seen for that instance, and no
/// later step may have been seen yet. Repeating the current step is allowed.
#[derive(Debug, Clone)]
pub struct WorkflowOrderRule {
    meta: RuleMeta,
    id_field: String,
    steps: Vec<String>,
}

impl WorkflowOrderRule {
    pub fn new(meta: RuleMeta, id_field: impl Into<String>, steps: Vec<String>) -> Self {
        Self {
            meta,
            id_field: id_field.into(),
            steps,
        }
    }

    fn workflow_id(&self, event: &Event) -> Option<String> {
        match event.payload.get(&self.id_field)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl InvariantRule for WorkflowOrderRule {
    rule_identity!();

    fn check(&self, events: &[Event]) -> Vec<InvariantViolation> {
        let mut instances: HashMap<String, Progress> = HashMap::new();
        let mut violations = Vec::new();

        for (position, event) in events.iter().enumerate() {
            let Some(step) = self.steps.iter().position(|s| *s == event.event_type) else {
                continue;
            };

            let Some(id) = self.workflow_id(event) else {
                violations.push(self.meta.violation(
                    format!(
                        "{} is missing workflow field '{}'",
                        event.event_type, self.id_field
                    ),
                    Evidence::single(position, event),
                ));
                continue;
            };

            let progress = instances.entry(id.clone()).or_insert_with(|| Progress {
                seen: vec![false; self.steps.len()],
                furthest: None,
            });

            let missing: Vec<&str> = (0..step)
                .filter(|j| !progress.seen[*j])
                .map(|j| self.steps[j].as_str())
                .collect();

            if !missing.is_empty() {
                violations.push(self.meta.violation(
                    format!(
                        "{} for workflow {} appeared before required step(s) {}",
                        event.event_type,
                        id,
                        missing.join(", ")
                    ),
                    Evidence::single(position, event),
                ));
            } else if let Some(furthest) = progress.furthest.filter(|f| *f > step) {
                violations.push(self.meta.violation(
                    format!(
                        "{} for workflow {} appeared after later step {}",
                        event.event_type, id, self.steps[furthest]
                    ),
                    Evidence::single(position, event),
                ));
            }

            progress.seen[step] = true;
            progress.furthest = Some(progress.furthest.map_or(step, |f| f.max(step)));
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Severity;

    fn rule() -> WorkflowOrderRule {
        WorkflowOrderRule::new(
            RuleMeta::new("PROPOSAL_WORKFLOW_ORDER", Severity::High, "d"),
            "proposal_id",
            ["CREATED", "VOTED", "PASSED", "EXECUTED"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    fn step(kind: &str, proposal: &str) -> Event {
        Event::at(kind, "a", Some("T"), "2026-01-01T00:00:00Z").with_field("proposal_id", proposal)
    }

    #[test]
    fn full_workflow_in_order_passes() {
        let events = vec![
            step("CREATED", "P1"),
            step("VOTED", "P1"),
            step("VOTED", "P1"),
            step("PASSED", "P1"),
            step("EXECUTED", "P1"),
        ];
        assert!(rule().check(&events).is_empty());
    }

    #[test]
    fn skipped_step_is_flagged() {
        let events = vec![step("CREATED", "P1"), step("PASSED", "P1")];
        let v = rule().check(&events);
        assert_eq!(v.len(), 1);
        assert!(v[0].message.contains("VOTED"));
        assert_eq!(v[0].evidence.position(), 1);
    }

    #[test]
    fn instances_are_tracked_independently() {
        let events = vec![
            step("CREATED", "P1"),
            step("VOTED", "P1"),
            step("VOTED", "P2"),
        ];
        let v = rule().check(&events);
        assert_eq!(v.len(), 1);
        assert!(v[0].message.contains("P2"));
    }

    #[test]
    fn earlier_step_after_later_step_is_flagged() {
        let events = vec![
            step("CREATED", "P1"),
            step("VOTED", "P1"),
            step("PASSED", "P1"),
            step("VOTED", "P1"),
        ];
        let v = rule().check(&events);
        assert_eq!(v.len(), 1);
        assert!(v[0].message.contains("after later step PASSED"));
    }

    #[test]
    fn step_without_id_is_flagged() {
        let events = vec![Event::at("CREATED", "a", Some("T"), "2026-01-01T00:00:00Z")];
        let v = rule().check(&events);
        assert_eq!(v.len(), 1);
        assert!(v[0].message.contains("proposal_id"));
    }

    #[test]
    fn numeric_ids_are_accepted() {
        let events = vec![
            Event::at("CREATED", "a", Some("T"), "2026-01-01T00:00:00Z").with_field("proposal_id", 7),
            Event::at("VOTED", "a", Some("T"), "2026-01-01T00:00:00Z").with_field("proposal_id", 7),
        ];
        assert!(rule().check(&events).is_empty());
    }
}
