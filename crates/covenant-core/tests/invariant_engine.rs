//! Engine-level behavior of the standard rule table.

use covenant_core::{
    event_types, Event, InvariantEngine, RuleKind, RuleSpec, RuleTable, Severity,
};

fn ev(kind: &str, task: Option<&str>, ts: &str) -> Event {
    Event::at(kind, "agent-1", task, ts)
}

#[test]
fn broadcast_requires_prior_license_for_same_task() {
    let engine = InvariantEngine::standard().unwrap();

    let ordered = vec![
        ev(event_types::LICENSE_VALID, Some("T1"), "2026-01-01T00:00:00Z"),
        ev(event_types::BROADCAST, Some("T1"), "2026-01-01T00:00:01Z"),
    ];
    assert!(engine.verify_ledger(&ordered).passed);

    let reversed = vec![
        ev(event_types::BROADCAST, Some("T1"), "2026-01-01T00:00:00Z"),
        ev(event_types::LICENSE_VALID, Some("T1"), "2026-01-01T00:00:01Z"),
    ];
    let report = engine.verify_ledger(&reversed);
    assert!(!report.passed);
    let hits: Vec<_> = report.by_rule("BROADCAST_LICENSE_REQUIREMENT").collect();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].severity, Severity::High);
    assert_eq!(hits[0].evidence.position(), 0);
}

#[test]
fn exact_duplicate_flags_second_copy() {
    let event = ev(event_types::SEALED, Some("T1"), "2026-01-01T00:00:00Z")
        .with_field("commit_id", "abc123");
    let report = InvariantEngine::standard().unwrap().verify_ledger(&[event.clone(), event]);
    let dupes: Vec<_> = report.by_rule("NO_DUPLICATE_EVENTS").collect();
    assert_eq!(dupes.len(), 1);
    assert_eq!(dupes[0].evidence.position(), 1);
    assert_eq!(report.violations.len(), 1);
}

#[test]
fn orphan_is_warning_and_does_not_pass() {
    let report = InvariantEngine::standard().unwrap().verify_ledger(&[ev(
        "NOTE",
        None,
        "2026-01-01T00:00:00Z",
    )]);
    assert!(!report.passed);
    assert_eq!(report.count(Severity::Warning), 1);
    assert!(!report.has_critical());
}

#[test]
fn constitution_deletion_is_critical() {
    let report = InvariantEngine::standard().unwrap().verify_ledger(&[ev(
        event_types::CONSTITUTION_DELETED,
        Some("T9"),
        "2026-01-01T00:00:00Z",
    )]);
    assert!(report.has_critical());
    assert_eq!(
        report.critical().next().unwrap().invariant_name,
        "CONSTITUTION_INTEGRITY"
    );
}

#[test]
fn proposal_lifecycle_in_order_is_clean() {
    let step = |kind: &str, ts: &str| ev(kind, Some("gov"), ts).with_field("proposal_id", "P-1");
    let events = vec![
        step(event_types::PROPOSAL_CREATED, "2026-01-01T00:00:00Z"),
        step(event_types::PROPOSAL_VOTED, "2026-01-01T00:00:01Z"),
        step(event_types::PROPOSAL_PASSED, "2026-01-01T00:00:02Z"),
        step(event_types::PROPOSAL_EXECUTED, "2026-01-01T00:00:03Z"),
    ];
    assert!(InvariantEngine::standard().unwrap().verify_ledger(&events).passed);
}

#[test]
fn proposal_executed_without_vote_is_flagged() {
    let step = |kind: &str, ts: &str| ev(kind, Some("gov"), ts).with_field("proposal_id", "P-2");
    let events = vec![
        step(event_types::PROPOSAL_CREATED, "2026-01-01T00:00:00Z"),
        step(event_types::PROPOSAL_EXECUTED, "2026-01-01T00:00:01Z"),
    ];
    let report = InvariantEngine::standard().unwrap().verify_ledger(&events);
    let hits: Vec<_> = report.by_rule("PROPOSAL_WORKFLOW_ORDER").collect();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].message.contains(event_types::PROPOSAL_VOTED));
}

#[test]
fn threat_screening_ignores_recorded_violations() {
    let text = "agent asked to disable the watchdog";
    let broadcast = ev(event_types::LICENSE_VALID, Some("T1"), "2026-01-01T00:00:00Z")
        .with_field("text", text);
    let recorded = ev(event_types::VIOLATION, Some("watchdog:tick-1"), "2026-01-01T00:00:01Z")
        .with_field("message", text);

    let report = InvariantEngine::standard().unwrap().verify_ledger(&[broadcast, recorded]);
    let hits: Vec<_> = report.by_rule("THREAT_SCREENING").collect();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].evidence.position(), 0);
}

#[test]
fn custom_table_from_toml() {
    let table = RuleTable::from_toml_str(
        r#"
        [[rules]]
        name = "DEPLOY_NEEDS_REVIEW"
        severity = "CRITICAL"
        kind = "precedence"
        event_type = "DEPLOY"
        requires = "REVIEWED"

        [[rules]]
        name = "NO_ORPHAN_EVENTS"
        severity = "WARNING"
        kind = "orphan"
        "#,
    )
    .unwrap();
    let engine = InvariantEngine::from_specs(&table.rules).unwrap();
    assert_eq!(engine.rule_names(), vec!["DEPLOY_NEEDS_REVIEW", "NO_ORPHAN_EVENTS"]);

    let report = engine.verify_ledger(&[ev("DEPLOY", Some("T1"), "2026-01-01T00:00:00Z")]);
    assert!(report.has_critical());
}

#[test]
fn builder_rejects_name_collision_across_kinds() {
    let err = InvariantEngine::builder()
        .spec(&RuleSpec::new("SAME", Severity::High, RuleKind::Orphan))
        .unwrap()
        .spec(&RuleSpec::new("SAME", Severity::Critical, RuleKind::Sequence))
        .unwrap_err();
    assert!(err.to_string().contains("SAME"));
}

#[test]
fn large_ledger_is_stable_across_runs() {
    let mut events = Vec::new();
    for i in 0..500u32 {
        let task = format!("T{}", i % 7);
        let ts = format!("2026-01-01T00:{:02}:{:02}Z", (i / 60) % 60, i % 60);
        let kind = if i % 11 == 0 { event_types::BROADCAST } else { "STEP" };
        events.push(ev(kind, Some(&task), &ts).with_field("i", i));
    }
    let engine = InvariantEngine::standard().unwrap();
    let first = engine.verify_ledger(&events);
    let second = engine.verify_ledger(&events);
    assert_eq!(first, second);
    assert_eq!(first.events_checked, 500);

    for name in engine.rule_names() {
        let positions: Vec<_> = first.by_rule(name).map(|v| v.evidence.position()).collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted, "{name} violations out of order");
    }
}
