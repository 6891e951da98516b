use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
use covenant_ledger::Event;

use super::rule::{rule_identity, InvariantRule, RuleMeta};
use crate::domain::{Evidence, InvariantViolation};

/// Within a task, timestamps must be non-decreasing in ledger order.
///
/// An event is compared with the latest timestamp seen so far for its task,
/// so a single out-of-order write is reported once against the event it
/// went back past. Timestamps without an offset are read as UTC. An event
/// whose timestamp does not parse at all is itself a violation, since its
/// order cannot be judged.
#[derive(Debug, Clone)]
pub struct SequenceRule {
    meta: RuleMeta,
}

impl SequenceRule {
    pub fn new(meta: RuleMeta) -> Self {
        Self { meta }
    }
}

impl InvariantRule for SequenceRule {
    rule_identity!();

    fn check(&self, events: &[Event]) -> Vec<InvariantViolation> {
        let mut latest: HashMap<&str, (usize, DateTime<FixedOffset>)> = HashMap::new();
        let mut violations = Vec::new();

        for (position, event) in events.iter().enumerate() {
            let Some(task) = event.task() else {
                continue;
            };
            let Some(ts) = event.parsed_timestamp() else {
                violations.push(self.meta.violation(
                    format!(
                        "{} for task {} has timestamp {:?}, which is not ISO-8601",
                        event.event_type, task, event.timestamp
                    ),
                    Evidence::single(position, event),
                ));
                continue;
            };

            match latest.get(task) {
                Some(&(prev_position, prev_ts)) if ts < prev_ts => {
                    violations.push(self.meta.violation(
                        format!(
                            "{} for task {} at {} is earlier than {} at position {} ({})",
                            event.event_type,
                            task,
                            event.timestamp,
                            events[prev_position].event_type,
                            prev_position,
                            events[prev_position].timestamp
                        ),
                        Evidence::pair(prev_position, &events[prev_position], position, event),
                    ));
                }
                _ => {
                    latest.insert(task, (position, ts));
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

    fn rule() -> SequenceRule {
        SequenceRule::new(RuleMeta::new("CAUSAL_TIMESTAMP_ORDER", Severity::High, "d"))
    }

    fn ev(task: &str, ts: &str) -> Event {
        Event::at("STEP", "a", Some(task), ts)
    }

    #[test]
    fn out_of_order_write_is_flagged() {
        let events = vec![
            ev("T1", "2026-01-01T00:00:05Z"),
            ev("T1", "2026-01-01T00:00:03Z"),
        ];
        let v = rule().check(&events);
        assert_eq!(v.len(), 1);
        assert!(matches!(
            v[0].evidence,
            Evidence::Pair {
                first_position: 0,
                second_position: 1,
                ..
            }
        ));
    }

    #[test]
    fn equal_timestamps_are_allowed() {
        let events = vec![
            ev("T1", "2026-01-01T00:00:05Z"),
            ev("T1", "2026-01-01T00:00:05Z"),
        ];
        assert!(rule().check(&events).is_empty());
    }

    #[test]
    fn different_tasks_are_independent() {
        let events = vec![
            ev("T1", "2026-01-01T00:00:05Z"),
            ev("T2", "2026-01-01T00:00:01Z"),
        ];
        assert!(rule().check(&events).is_empty());
    }

    #[test]
    fn compares_instants_across_offsets() {
        // 01:00+01:00 is the same instant as 00:00Z, so 00:30Z comes after it.
        let events = vec![
            ev("T1", "2026-01-01T01:00:00+01:00"),
            ev("T1", "2026-01-01T00:30:00Z"),
        ];
        assert!(rule().check(&events).is_empty());
    }

    #[test]
    fn compares_against_latest_not_previous() {
        let events = vec![
            ev("T1", "2026-01-01T00:00:10Z"),
            ev("T1", "2026-01-01T00:00:02Z"),
            ev("T1", "2026-01-01T00:00:05Z"),
        ];
        let v = rule().check(&events);
        let positions: Vec<_> = v.iter().map(|x| x.evidence.position()).collect();
        assert_eq!(positions, vec![1, 2]);
    }

    #[test]
    fn offset_less_timestamps_are_ordered() {
        let events = vec![
            ev("T1", "2026-01-01T00:00:10"),
            ev("T1", "2026-01-01T00:00:02"),
        ];
        let v = rule().check(&events);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].evidence.position(), 1);
    }

    #[test]
    fn naive_and_zoned_timestamps_compare_as_utc() {
        let events = vec![
            ev("T1", "2026-01-01T00:00:10Z"),
            ev("T1", "2026-01-01 00:00:05.500"),
        ];
        assert_eq!(rule().check(&events).len(), 1);
    }

    #[test]
    fn unparseable_timestamp_is_reported() {
        let events = vec![
            ev("T1", "2026-01-01T00:00:10Z"),
            ev("T1", "yesterday"),
            ev("T1", "2026-01-01T00:00:11Z"),
        ];
        let v = rule().check(&events);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].evidence.position(), 1);
        assert!(v[0].message.contains("not ISO-8601"));
    }
}
