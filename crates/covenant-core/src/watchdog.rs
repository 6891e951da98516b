//! Continuous invariant enforcement over the ledger tail.
//!
//! The host drives the watchdog by calling [`Watchdog::tick`] on a timer.
//! Each tick reads events appended since the last judged offset, evaluates
//! the invariant engine over them, records every finding as a `VIOLATION`
//! ledger event, and halts on any CRITICAL finding. A finding whose append
//! fails stays queued (and checkpointed) and is retried on later ticks.
//!
//! State machine:
//!
//! ```text
//! Idle --tick--> Checking --(no critical)--> Idle
//!                         --(critical)-----> Halted (terminal)
//! ```

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use covenant_ledger::{event_types, Event, EventLedger, LedgerOffset};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, warn, Instrument};

use crate::attest::Attestable;
use crate::config::CovenantConfig;
use crate::domain::{InvariantViolation, Result, Severity, VerificationReport};
use crate::invariants::InvariantEngine;
use crate::metrics::METRICS;
use crate::obs;

/// `agent_id` on every event the watchdog writes.
pub const WATCHDOG_AGENT_ID: &str = "covenant.watchdog";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogState {
    Idle,
    Checking,
    Halted,
}

/// What a tick evaluates the tail against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchScope {
    /// Rules see only the new events. Cheap, but history-dependent rules
    /// (precedence, duplicates) cannot match across tick boundaries.
    #[default]
    Window,
    /// Rules see the whole ledger; only findings attributed to new events
    /// are reported.
    FullReplay,
}

impl WatchScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchScope::Window => "window",
            WatchScope::FullReplay => "full_replay",
        }
    }
}

/// Cooperative halt flag shared with the host and the Evolution Gate.
#[derive(Debug, Clone, Default)]
pub struct HaltSignal(Arc<AtomicBool>);

impl HaltSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_halted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Raise the flag. There is no way to lower it.
    pub fn trip(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Resume point persisted by the host between process runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchdogCheckpoint {
    pub offset: LedgerOffset,
    pub events_seen: u64,
    pub violation_count: u64,
    /// Set once the watchdog halts; a resumed watchdog starts halted.
    #[serde(default)]
    pub halted_reason: Option<String>,
    /// `VIOLATION` events judged but not yet appended.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_violations: Vec<Event>,
}

impl WatchdogCheckpoint {
    /// Load a checkpoint; `None` when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>> {
        match fs::read(path.as_ref()) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replace the checkpoint file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&serde_json::to_vec_pretty(self)?)?;
        tmp.as_file().sync_data()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Result of a single tick. Ticks never fail; problems show up in `fault`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickOutcome {
    pub should_halt: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<VerificationReport>,
    pub new_events: usize,
    pub violations_recorded: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

impl TickOutcome {
    fn fault(fault: String) -> Self {
        Self {
            fault: Some(fault),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchdogStatus {
    pub state: WatchdogState,
    pub scope: WatchScope,
    pub offset: LedgerOffset,
    pub events_seen: u64,
    pub violation_count: u64,
    pub pending_violations: usize,
    pub halted_reason: Option<String>,
}

/// Tunables for a [`Watchdog`].
#[derive(Debug, Clone, PartialEq)]
pub struct WatchdogOptions {
    pub scope: WatchScope,
    pub read_timeout: Duration,
    pub eval_timeout: Duration,
}

impl Default for WatchdogOptions {
    fn default() -> Self {
        Self {
            scope: WatchScope::Window,
            read_timeout: Duration::from_secs(5),
            eval_timeout: Duration::from_secs(10),
        }
    }
}

impl WatchdogOptions {
    pub fn from_config(config: &CovenantConfig) -> Self {
        Self {
            scope: config.watchdog.scope,
            read_timeout: config.read_timeout(),
            eval_timeout: config.eval_timeout(),
        }
    }
}

#[derive(Debug, Clone)]
struct HaltRecord {
    reason: String,
    report: Option<VerificationReport>,
}

// ---------------------------------------------------------------------------
// Watchdog
// ---------------------------------------------------------------------------

pub struct Watchdog {
    ledger: Arc<dyn EventLedger>,
    engine: Arc<InvariantEngine>,
    options: WatchdogOptions,
    state: WatchdogState,
    offset: LedgerOffset,
    events_seen: u64,
    violation_count: u64,
    pending: Vec<Event>,
    signal: HaltSignal,
    halted: Option<HaltRecord>,
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("state", &self.state)
            .field("offset", &self.offset)
            .field("events_seen", &self.events_seen)
            .field("violation_count", &self.violation_count)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl Watchdog {
    /// A watchdog that starts at the beginning of the ledger.
    pub fn new(
        ledger: Arc<dyn EventLedger>,
        engine: Arc<InvariantEngine>,
        options: WatchdogOptions,
    ) -> Self {
        Self {
            ledger,
            engine,
            options,
            state: WatchdogState::Idle,
            offset: LedgerOffset::start(),
            events_seen: 0,
            violation_count: 0,
            pending: Vec::new(),
            signal: HaltSignal::new(),
            halted: None,
        }
    }

    /// A watchdog that continues after `checkpoint`. A checkpoint taken
    /// after a halt yields a watchdog that is already halted.
    pub fn resume(
        ledger: Arc<dyn EventLedger>,
        engine: Arc<InvariantEngine>,
        options: WatchdogOptions,
        checkpoint: WatchdogCheckpoint,
    ) -> Self {
        let mut watchdog = Self::new(ledger, engine, options);
        watchdog.offset = checkpoint.offset;
        watchdog.events_seen = checkpoint.events_seen;
        watchdog.violation_count = checkpoint.violation_count;
        watchdog.pending = checkpoint.pending_violations;
        if let Some(reason) = checkpoint.halted_reason {
            watchdog.enter_halt(reason, None);
        }
        watchdog
    }

    /// Share a halt signal owned by the host instead of the watchdog's own.
    pub fn with_signal(mut self, signal: HaltSignal) -> Self {
        if self.signal.is_halted() {
            signal.trip();
        }
        self.signal = signal;
        self
    }

    pub fn halt_signal(&self) -> HaltSignal {
        self.signal.clone()
    }

    pub fn state(&self) -> WatchdogState {
        self.state
    }

    pub fn is_halted(&self) -> bool {
        self.state == WatchdogState::Halted
    }

    /// Violations appended to the ledger so far.
    pub fn violation_count(&self) -> u64 {
        self.violation_count
    }

    /// `VIOLATION` events waiting for a successful append.
    pub fn pending_violations(&self) -> &[Event] {
        &self.pending
    }

    pub fn status(&self) -> WatchdogStatus {
        WatchdogStatus {
            state: self.state,
            scope: self.options.scope,
            offset: self.offset,
            events_seen: self.events_seen,
            violation_count: self.violation_count,
            pending_violations: self.pending.len(),
            halted_reason: self.halted.as_ref().map(|h| h.reason.clone()),
        }
    }

    pub fn checkpoint(&self) -> WatchdogCheckpoint {
        WatchdogCheckpoint {
            offset: self.offset,
            events_seen: self.events_seen,
            violation_count: self.violation_count,
            halted_reason: self.halted.as_ref().map(|h| h.reason.clone()),
            pending_violations: self.pending.clone(),
        }
    }

    /// Judge everything appended since the previous tick.
    pub async fn tick(&mut self, counter: u64) -> TickOutcome {
        let span = obs::tick_span(counter);
        self.tick_inner(counter).instrument(span).await
    }

    async fn tick_inner(&mut self, counter: u64) -> TickOutcome {
        if let Some(record) = &self.halted {
            let reason = Some(record.reason.clone());
            let report = record.report.clone();
            // Halted ticks judge nothing new but still drain queued findings.
            let (recorded, fault) = self.flush_pending().await;
            return TickOutcome {
                should_halt: true,
                reason,
                report,
                violations_recorded: recorded,
                fault,
                ..TickOutcome::default()
            };
        }

        self.state = WatchdogState::Checking;
        METRICS.inc_ticks();
        let (retried, retry_fault) = self.flush_pending().await;
        let mut outcome = self.check(counter).await;
        outcome.violations_recorded += retried;
        if outcome.fault.is_none() {
            outcome.fault = retry_fault;
        }
        if !self.is_halted() {
            self.state = WatchdogState::Idle;
        }

        match &outcome.fault {
            Some(fault) => obs::emit_tick_fault(counter, fault),
            None => obs::emit_tick_completed(
                counter,
                outcome.new_events,
                outcome.violations_recorded,
                self.offset.0,
            ),
        }
        outcome
    }

    async fn check(&mut self, counter: u64) -> TickOutcome {
        let read_start = match self.options.scope {
            WatchScope::Window => self.offset,
            WatchScope::FullReplay => LedgerOffset::start(),
        };
        let batch = match tokio::time::timeout(
            self.options.read_timeout,
            self.ledger.read_from(read_start),
        )
        .await
        {
            Ok(Ok(batch)) => batch,
            Ok(Err(e)) => return TickOutcome::fault(format!("ledger read failed: {e}")),
            Err(_) => {
                return TickOutcome::fault(format!(
                    "ledger read timed out after {:?}",
                    self.options.read_timeout
                ))
            }
        };

        let base = self.events_seen;
        let (history, tail) = match self.options.scope {
            WatchScope::Window => (Vec::new(), batch.events),
            WatchScope::FullReplay => {
                let mut all = batch.events;
                let boundary = usize::try_from(base).unwrap_or(usize::MAX);
                if all.len() < boundary {
                    return TickOutcome::fault(format!(
                        "ledger holds {} events but {} were already judged",
                        all.len(),
                        base
                    ));
                }
                let tail = all.split_off(boundary);
                (all, tail)
            }
        };

        if tail.is_empty() {
            self.offset = batch.next_offset;
            return TickOutcome::default();
        }

        let new_events = tail.len();
        let report = match self.evaluate(history, tail).await {
            Ok(report) => report,
            // Offset stays put so the same tail is judged again next tick.
            Err(fault) => return TickOutcome::fault(fault),
        };

        self.offset = batch.next_offset;
        self.events_seen += new_events as u64;
        METRICS.add_events_checked(new_events as u64);

        let mut fault = None;
        for violation in &report.violations {
            let position = base as usize + violation.evidence.position();
            match violation_event(counter, violation, position) {
                Ok(event) => self.pending.push(event),
                Err(e) => {
                    warn!(invariant = %violation.invariant_name, error = %e, "failed to encode violation");
                    fault.get_or_insert_with(|| format!("failed to encode violation: {e}"));
                }
            }
        }
        let (recorded, append_fault) = self.flush_pending().await;
        if fault.is_none() {
            fault = append_fault;
        }

        let reason = report.critical().next().map(|v| {
            format!(
                "critical invariant {} violated: {}",
                v.invariant_name, v.message
            )
        });

        let should_halt = reason.is_some();
        if let Some(reason) = &reason {
            self.enter_halt(reason.clone(), Some(report.clone()));
            self.record_halt(counter, reason, &report).await;
        }

        TickOutcome {
            should_halt,
            reason,
            report: Some(report),
            new_events,
            violations_recorded: recorded,
            fault,
        }
    }

    async fn evaluate(
        &self,
        history: Vec<Event>,
        tail: Vec<Event>,
    ) -> std::result::Result<VerificationReport, String> {
        let engine = Arc::clone(&self.engine);
        let scope = self.options.scope;
        let task = tokio::task::spawn_blocking(move || match scope {
            WatchScope::Window => engine.verify_ledger(&tail),
            WatchScope::FullReplay => engine.verify_with_context(&history, &tail),
        });
        match tokio::time::timeout(self.options.eval_timeout, task).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Err(format!("rule evaluation failed: {e}")),
            Err(_) => Err(format!(
                "rule evaluation timed out after {:?}",
                self.options.eval_timeout
            )),
        }
    }

    /// Append queued `VIOLATION` events in order, stopping at the first
    /// failure. Whatever is left stays queued for the next tick.
    async fn flush_pending(&mut self) -> (usize, Option<String>) {
        let mut recorded = 0;
        let mut fault = None;
        while let Some(event) = self.pending.first() {
            if let Err(e) = self.ledger.append(event).await {
                warn!(
                    pending = self.pending.len(),
                    error = %e,
                    "failed to record violation; retrying next tick"
                );
                fault = Some(format!("failed to record violation: {e}"));
                break;
            }
            obs::emit_violation_recorded(
                event.payload_str("invariant_name").unwrap_or_default(),
                event.payload_str("severity").unwrap_or_default(),
                event
                    .payload
                    .get("position")
                    .and_then(Value::as_u64)
                    .unwrap_or_default() as usize,
            );
            self.pending.remove(0);
            recorded += 1;
        }
        self.violation_count += recorded as u64;
        METRICS.add_violations_recorded(recorded as u64);
        (recorded, fault)
    }

    async fn record_halt(&self, counter: u64, reason: &str, report: &VerificationReport) {
        let mut payload = Map::new();
        payload.insert("reason".into(), Value::String(reason.to_string()));
        payload.insert(
            "critical".into(),
            Value::from(report.count(Severity::Critical) as u64),
        );
        payload.insert(
            "invariants".into(),
            Value::from(
                report
                    .critical()
                    .map(|v| v.invariant_name.clone())
                    .collect::<Vec<_>>(),
            ),
        );
        let event = Event::new(
            event_types::WATCHDOG_HALTED,
            WATCHDOG_AGENT_ID,
            Some(tick_task(counter)),
            payload,
        );
        if let Err(e) = self.ledger.append(&event).await {
            warn!(error = %e, "failed to record watchdog halt");
        }
    }

    fn enter_halt(&mut self, reason: String, report: Option<VerificationReport>) {
        if self.halted.is_none() {
            METRICS.inc_halts();
            obs::emit_halt(&reason);
        }
        self.state = WatchdogState::Halted;
        self.signal.trip();
        debug!(reason = %reason, "watchdog halted");
        self.halted = Some(HaltRecord { reason, report });
    }
}

fn violation_event(
    counter: u64,
    violation: &InvariantViolation,
    position: usize,
) -> Result<Event> {
    let mut payload = Map::new();
    payload.insert(
        "invariant_name".into(),
        Value::String(violation.invariant_name.clone()),
    );
    payload.insert(
        "severity".into(),
        Value::String(violation.severity.as_str().to_string()),
    );
    payload.insert("message".into(), Value::String(violation.message.clone()));
    payload.insert("position".into(), Value::from(position as u64));
    payload.insert(
        "evidence_task_id".into(),
        violation
            .evidence
            .event()
            .task_id
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
    );
    payload.insert("evidence".into(), serde_json::to_value(&violation.evidence)?);

    Ok(Event::new(
        event_types::VIOLATION,
        WATCHDOG_AGENT_ID,
        Some(tick_task(counter)),
        payload,
    ))
}

fn tick_task(counter: u64) -> String {
    format!("watchdog:tick-{counter}")
}

impl Attestable for Watchdog {
    fn component_id(&self) -> &str {
        WATCHDOG_AGENT_ID
    }

    fn commitments(&self) -> Vec<String> {
        let mut commitments: Vec<String> = self
            .engine
            .rule_names()
            .into_iter()
            .map(|name| format!("enforces {name}"))
            .collect();
        commitments.push(format!("scope {}", self.options.scope.as_str()));
        commitments.push("halts on CRITICAL".to_string());
        commitments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_ledger::fakes::MemoryLedger;

    fn ev(kind: &str, task: &str, ts: &str) -> Event {
        Event::at(kind, "agent", Some(task), ts)
    }

    fn watchdog(ledger: Arc<MemoryLedger>) -> Watchdog {
        Watchdog::new(
            ledger,
            Arc::new(InvariantEngine::standard().unwrap()),
            WatchdogOptions::default(),
        )
    }

    #[tokio::test]
    async fn empty_ledger_tick_is_clean() {
        let ledger = Arc::new(MemoryLedger::new());
        let mut dog = watchdog(ledger.clone());
        let outcome = dog.tick(1).await;
        assert!(!outcome.should_halt);
        assert!(outcome.fault.is_none());
        assert_eq!(outcome.new_events, 0);
        assert_eq!(dog.state(), WatchdogState::Idle);
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn high_violation_is_recorded_without_halting() {
        let ledger = Arc::new(MemoryLedger::with_events(vec![ev(
            "BROADCAST",
            "T1",
            "2026-01-01T00:00:00Z",
        )]));
        let mut dog = watchdog(ledger.clone());
        let outcome = dog.tick(1).await;
        assert!(!outcome.should_halt);
        assert_eq!(outcome.violations_recorded, 1);
        assert_eq!(dog.violation_count(), 1);

        let recorded = &ledger.snapshot()[1];
        assert_eq!(recorded.event_type, event_types::VIOLATION);
        assert_eq!(recorded.agent_id, WATCHDOG_AGENT_ID);
        assert_eq!(recorded.task_id.as_deref(), Some("watchdog:tick-1"));
        assert_eq!(
            recorded.payload_str("invariant_name"),
            Some("BROADCAST_LICENSE_REQUIREMENT")
        );
        assert_eq!(recorded.payload_str("evidence_task_id"), Some("T1"));
        assert_eq!(recorded.payload["position"], 0);
    }

    #[tokio::test]
    async fn unavailable_ledger_is_a_fault_and_keeps_offset() {
        let ledger = Arc::new(MemoryLedger::with_events(vec![ev(
            "BROADCAST",
            "T1",
            "2026-01-01T00:00:00Z",
        )]));
        let mut dog = watchdog(ledger.clone());
        ledger.set_available(false);
        let outcome = dog.tick(1).await;
        assert!(outcome.fault.is_some());
        assert_eq!(dog.status().offset, LedgerOffset::start());

        ledger.set_available(true);
        let outcome = dog.tick(2).await;
        assert!(outcome.fault.is_none());
        assert_eq!(outcome.new_events, 1);
        assert_eq!(outcome.violations_recorded, 1);
    }

    #[tokio::test]
    async fn checkpoint_roundtrip_and_resume() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchdog.checkpoint.json");
        assert!(WatchdogCheckpoint::load(&path).unwrap().is_none());

        let ledger = Arc::new(MemoryLedger::with_events(vec![ev(
            "LICENSE_VALID",
            "T1",
            "2026-01-01T00:00:00Z",
        )]));
        let mut dog = watchdog(ledger.clone());
        dog.tick(1).await;
        dog.checkpoint().save(&path).unwrap();

        let loaded = WatchdogCheckpoint::load(&path).unwrap().unwrap();
        assert_eq!(loaded, dog.checkpoint());

        let mut resumed = Watchdog::resume(
            ledger.clone(),
            Arc::new(InvariantEngine::standard().unwrap()),
            WatchdogOptions::default(),
            loaded,
        );
        let outcome = resumed.tick(2).await;
        assert_eq!(outcome.new_events, 0);
    }

    #[tokio::test]
    async fn halted_checkpoint_resumes_halted() {
        let ledger: Arc<MemoryLedger> = Arc::new(MemoryLedger::new());
        let checkpoint = WatchdogCheckpoint {
            halted_reason: Some("critical invariant X violated".into()),
            ..Default::default()
        };
        let mut dog = Watchdog::resume(
            ledger,
            Arc::new(InvariantEngine::standard().unwrap()),
            WatchdogOptions::default(),
            checkpoint,
        );
        assert!(dog.halt_signal().is_halted());
        let outcome = dog.tick(1).await;
        assert!(outcome.should_halt);
        assert_eq!(outcome.reason.as_deref(), Some("critical invariant X violated"));
    }

    #[test]
    fn attestation_lists_rules() {
        let dog = watchdog(Arc::new(MemoryLedger::new()));
        let attestation = dog.attest();
        assert_eq!(attestation.component_id, WATCHDOG_AGENT_ID);
        assert!(attestation
            .commitments
            .contains(&"enforces CONSTITUTION_INTEGRITY".to_string()));
        assert!(attestation.verify());
    }

    #[test]
    fn shared_signal_observes_halt() {
        let host = HaltSignal::new();
        let dog = watchdog(Arc::new(MemoryLedger::new())).with_signal(host.clone());
        assert!(!host.is_halted());
        dog.halt_signal().trip();
        assert!(host.is_halted());
    }
}
