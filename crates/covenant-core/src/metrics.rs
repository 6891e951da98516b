//! Process-wide governance counters.
//!
//! Counters are bumped at the call site and emitted together by
//! [`Metrics::flush`], e.g. once per daemon tick.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lock-free counters.
pub struct Metrics {
    ticks: AtomicU64,
    events_checked: AtomicU64,
    violations_recorded: AtomicU64,
    halts: AtomicU64,
    seals_committed: AtomicU64,
    seals_rejected: AtomicU64,
    attestations: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            events_checked: AtomicU64::new(0),
            violations_recorded: AtomicU64::new(0),
            halts: AtomicU64::new(0),
            seals_committed: AtomicU64::new(0),
            seals_rejected: AtomicU64::new(0),
            attestations: AtomicU64::new(0),
        }
    }

    pub fn inc_ticks(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "ticks", "counter incremented");
    }

    pub fn add_events_checked(&self, n: u64) {
        self.events_checked.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_violations_recorded(&self, n: u64) {
        self.violations_recorded.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "violations_recorded", n, "counter incremented");
    }

    pub fn inc_halts(&self) {
        self.halts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_seals_committed(&self) {
        self.seals_committed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "seals_committed", "counter incremented");
    }

    pub fn inc_seals_rejected(&self) {
        self.seals_rejected.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "seals_rejected", "counter incremented");
    }

    pub fn inc_attestations(&self) {
        self.attestations.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            ticks = self.ticks(),
            events_checked = self.events_checked(),
            violations_recorded = self.violations_recorded(),
            halts = self.halts(),
            seals_committed = self.seals_committed(),
            seals_rejected = self.seals_rejected(),
            attestations = self.attestations(),
        );
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn events_checked(&self) -> u64 {
        self.events_checked.load(Ordering::Relaxed)
    }

    pub fn violations_recorded(&self) -> u64 {
        self.violations_recorded.load(Ordering::Relaxed)
    }

    pub fn halts(&self) -> u64 {
        self.halts.load(Ordering::Relaxed)
    }

    pub fn seals_committed(&self) -> u64 {
        self.seals_committed.load(Ordering::Relaxed)
    }

    pub fn seals_rejected(&self) -> u64 {
        self.seals_rejected.load(Ordering::Relaxed)
    }

    pub fn attestations(&self) -> u64 {
        self.attestations.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.ticks,
            &self.events_checked,
            &self.violations_recorded,
            &self.halts,
            &self.seals_committed,
            &self.seals_rejected,
            &self.attestations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
