use std::collections::HashMap;

use covenant_ledger::Event;

use super::rule::{rule_identity, InvariantRule, RuleMeta};
use crate::domain::{Evidence, InvariantViolation};

/// No two events may share the full identity tuple. Every repeat after the
/// first occurrence is a violation.
#[derive(Debug, Clone)]
pub struct UniquenessRule {
    meta: RuleMeta,
}

impl UniquenessRule {
    pub fn new(meta: RuleMeta) -> Self {
        Self { meta }
    }
}

impl InvariantRule for UniquenessRule {
    rule_identity!();

    fn check(&self, events: &[Event]) -> Vec<InvariantViolation> {
        let mut first_seen: HashMap<String, usize> = HashMap::new();
        let mut violations = Vec::new();

        for (position, event) in events.iter().enumerate() {
            let key = event.identity_key();
            match first_seen.get(&key) {
                Some(&first) => violations.push(self.meta.violation(
                    format!(
                        "{} by {} duplicates the event at position {}",
                        event.event_type, event.agent_id, first
                    ),
                    Evidence::pair(first, &events[first], position, event),
                )),
                None => {
                    first_seen.insert(key, position);
                }
            }
        }

        violations
    }
}
