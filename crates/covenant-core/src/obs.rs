//! Logging setup and structured lifecycle events for the watchdog, gate and
//! attestation.
//!
//! Every `emit_*` function logs one `info!` (or `warn!`/`error!`) line with a
//! stable `event` field so log pipelines can filter on it.

use tracing::{error, info, warn, Level, Span};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose logs follow the requested level. Everything else is held at
/// `warn`.
const COVENANT_TARGETS: &[&str] = &[
    "covenant_ledger",
    "covenant_core",
    "covenant_gate",
    "covenant",
    "covenantd",
];

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(COVENANT_TARGETS.iter().map(|t| format!("{t}={level}")));
    directives.join(",")
}

/// Install the global subscriber for the `covenant` and `covenantd` binaries.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
/// JSON lines carry the event fields at top level plus the enclosing
/// `covenant.tick` or `covenant.seal` span. Only the first call in a process
/// has any effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()
            .ok();
    }
}

/// Span for a single watchdog tick. Attach with `Instrument::instrument` so
/// it stays correct across await points.
pub fn tick_span(counter: u64) -> Span {
    tracing::info_span!("covenant.tick", counter)
}

/// Span for one seal attempt.
pub fn seal_span(dest_path: &str) -> Span {
    tracing::info_span!("covenant.seal", dest_path = %dest_path)
}

pub fn emit_tick_completed(counter: u64, new_events: usize, violations: usize, offset: u64) {
    info!(
        event = "watchdog.tick",
        counter,
        new_events,
        violations,
        offset,
    );
}

pub fn emit_tick_fault(counter: u64, fault: &str) {
    warn!(event = "watchdog.fault", counter, fault = %fault);
}

pub fn emit_violation_recorded(invariant: &str, severity: &str, position: usize) {
    info!(
        event = "watchdog.violation",
        invariant = %invariant,
        severity = %severity,
        position,
    );
}

pub fn emit_halt(reason: &str) {
    error!(event = "watchdog.halted", reason = %reason);
}

pub fn emit_proposal_staged(staging_path: &str, target_path: &str) {
    info!(event = "gate.staged", staging_path = %staging_path, target_path = %target_path);
}

pub fn emit_verdict(staging_path: &str, passed: bool, reason: &str) {
    info!(
        event = "gate.verified",
        staging_path = %staging_path,
        passed,
        reason = %reason,
    );
}

pub fn emit_seal_outcome(dest_path: &str, status: &str, reason: Option<&str>, commit_id: Option<&str>) {
    info!(
        event = "gate.sealed",
        dest_path = %dest_path,
        status = %status,
        reason = reason.unwrap_or(""),
        commit_id = commit_id.unwrap_or(""),
    );
}

pub fn emit_attestation(component_id: &str, digest: &str) {
    info!(event = "attestation.recorded", component_id = %component_id, digest = %digest);
}
