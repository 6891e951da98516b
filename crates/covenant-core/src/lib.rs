//! Covenant Core: invariant engine, watchdog, and shared governance types
//!
//! This crate provides:
//! - Domain models: severity, violations, verification reports
//! - `invariants`: rule kinds, declarative rule tables, and the batch engine
//! - `watchdog`: host-driven continuous enforcement with a sticky halt
//! - `attest`: component attestation recorded on the ledger
//! - Configuration, tracing setup, metrics, and structured lifecycle events

pub mod attest;
pub mod config;
pub mod domain;
pub mod invariants;
pub mod metrics;
pub mod obs;
pub mod watchdog;

pub use attest::{record_attestation, Attestable, Attestation};
pub use config::{CommitterKind, CovenantConfig, GateSettings, GitAuthor, LedgerSettings, WatchdogSettings};
pub use domain::{
    CovenantError, Evidence, InvariantViolation, Result, Severity, VerificationReport,
};
pub use invariants::{
    standard_rules, InvariantEngine, InvariantEngineBuilder, InvariantRule, RuleKind, RuleMeta,
    RuleSpec, RuleTable, ScreenPattern,
};
pub use metrics::METRICS;
pub use obs::init_tracing;
pub use watchdog::{
    HaltSignal, TickOutcome, WatchScope, Watchdog, WatchdogCheckpoint, WatchdogOptions,
    WatchdogState, WatchdogStatus, WATCHDOG_AGENT_ID,
};

// Re-export the ledger layer so downstream crates need one dependency.
pub use covenant_ledger as ledger;
pub use covenant_ledger::{event_types, Event, EventLedger, JsonlLedger, LedgerError, LedgerOffset};

/// Covenant version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
