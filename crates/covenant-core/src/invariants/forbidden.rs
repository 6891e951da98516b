use covenant_ledger::Event;

use super::rule::{rule_identity, InvariantRule, RuleMeta};
use crate::domain::{Evidence, InvariantViolation};

/// An event type that must never appear in the ledger.
#[derive(Debug, Clone)]
pub struct ForbiddenTypeRule {
    meta: RuleMeta,
    event_type: String,
}

impl ForbiddenTypeRule {
    pub fn new(meta: RuleMeta, event_type: impl Into<String>) -> Self {
        Self {
            meta,
            event_type: event_type.into(),
        }
    }
}

impl InvariantRule for ForbiddenTypeRule {
    rule_identity!();

    fn check(&self, events: &[Event]) -> Vec<InvariantViolation> {
        events
            .iter()
            .enumerate()
            .filter(|(_, event)| event.event_type == self.event_type)
            .map(|(position, event)| {
                self.meta.violation(
                    format!(
                        "forbidden event {} emitted by {}",
                        event.event_type, event.agent_id
                    ),
                    Evidence::single(position, event),
                )
            })
            .collect()
    }
}
