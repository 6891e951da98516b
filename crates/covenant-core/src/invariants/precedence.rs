use std::collections::HashSet;

use covenant_ledger::Event;

use super::rule::{rule_identity, InvariantRule, RuleMeta};
use crate::domain::{Evidence, InvariantViolation};

/// `event_type` with task T is valid only if a `requires` event with the
/// same task appears earlier in the list.
#[derive(Debug, Clone)]
pub struct PrecedenceRule {
    meta: RuleMeta,
    event_type: String,
    requires: String,
}

impl PrecedenceRule {
    pub fn new(meta: RuleMeta, event_type: impl Into<String>, requires: impl Into<String>) -> Self {
        Self {
            meta,
            event_type: event_type.into(),
            requires: requires.into(),
        }
    }
}

impl InvariantRule for PrecedenceRule {
    rule_identity!();

    fn check(&self, events: &[Event]) -> Vec<InvariantViolation> {
        let mut satisfied: HashSet<&str> = HashSet::new();
        let mut violations = Vec::new();

        for (position, event) in events.iter().enumerate() {
            // Check before recording so an event never satisfies itself.
            if event.event_type == self.event_type {
                match event.task() {
                    Some(task) if satisfied.contains(task) => {}
                    Some(task) => violations.push(self.meta.violation(
                        format!(
                            "{} for task {} has no preceding {}",
                            self.event_type, task, self.requires
                        ),
                        Evidence::single(position, event),
                    )),
                    None => violations.push(self.meta.violation(
                        format!(
                            "{} without a task_id cannot be matched to a preceding {}",
                            self.event_type, self.requires
                        ),
                        Evidence::single(position, event),
                    )),
                }
            }
            if event.event_type == self.requires {
                if let Some(task) = event.task() {
                    satisfied.insert(task);
                }
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Severity;

    fn rule() -> PrecedenceRule {
        PrecedenceRule::new(
            RuleMeta::new("BROADCAST_LICENSE_REQUIREMENT", Severity::High, "test"),
            "BROADCAST",
            "LICENSE_VALID",
        )
    }

    fn ev(kind: &str, task: &str) -> Event {
        Event::at(kind, "agent", Some(task), "2026-01-01T00:00:00Z")
    }

    #[test]
    fn requirement_after_the_fact_does_not_count() {
        let events = vec![ev("BROADCAST", "T1"), ev("LICENSE_VALID", "T1")];
        let v = rule().check(&events);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].evidence.position(), 0);
    }

    #[test]
    fn requirement_is_scoped_per_task() {
        let events = vec![ev("LICENSE_VALID", "T1"), ev("BROADCAST", "T2")];
        let v = rule().check(&events);
        assert_eq!(v.len(), 1);
        assert!(v[0].message.contains("T2"));
    }

    #[test]
    fn one_requirement_covers_many_events() {
        let events = vec![
            ev("LICENSE_VALID", "T1"),
            ev("BROADCAST", "T1"),
            ev("BROADCAST", "T1"),
        ];
        assert!(rule().check(&events).is_empty());
    }

    #[test]
    fn self_referential_rule_needs_an_earlier_event() {
        let rule = PrecedenceRule::new(RuleMeta::new("R", Severity::High, "d"), "A", "A");
        let v = rule.check(&[ev("A", "T"), ev("A", "T")]);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].evidence.position(), 0);
    }
}
