use covenant_ledger::Event;

use super::rule::{rule_identity, InvariantRule, RuleMeta};
use crate::domain::{Evidence, InvariantViolation};

/// Every event must carry a non-empty task_id.
#[derive(Debug, Clone)]
pub struct OrphanRule {
    meta: RuleMeta,
}

impl OrphanRule {
    pub fn new(meta: RuleMeta) -> Self {
        Self { meta }
    }
}

impl InvariantRule for OrphanRule {
    rule_identity!();

    fn check(&self, events: &[Event]) -> Vec<InvariantViolation> {
        events
            .iter()
            .enumerate()
            .filter(|(_, event)| event.task().is_none())
            .map(|(position, event)| {
                self.meta.violation(
                    format!(
                        "{} by {} has no task_id",
                        event.event_type, event.agent_id
                    ),
                    Evidence::single(position, event),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Severity;

    #[test]
    fn missing_and_blank_task_ids_are_orphans() {
        let rule = OrphanRule::new(RuleMeta::new("NO_ORPHAN_EVENTS", Severity::Warning, "d"));
        let events = vec![
            Event::at("A", "x", None, "2026-01-01T00:00:00Z"),
            Event::at("B", "x", Some("T1"), "2026-01-01T00:00:00Z"),
            Event::at("C", "x", Some(""), "2026-01-01T00:00:00Z"),
        ];
        let v = rule.check(&events);
        let positions: Vec<_> = v.iter().map(|x| x.evidence.position()).collect();
        assert_eq!(positions, vec![0, 2]);
        assert!(v.iter().all(|x| x.severity == Severity::Warning));
    }
}
