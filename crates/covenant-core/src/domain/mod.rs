//! Domain models for Covenant.
//!
//! Canonical definitions shared by the engine, the watchdog and the gate:
//! - `Severity`: how a violation is handled downstream
//! - `InvariantViolation` / `Evidence`: a single finding and what it points at
//! - `VerificationReport`: the per-invocation result of a batch check

pub mod error;
pub mod report;

pub use error::{CovenantError, Result};
pub use report::{Evidence, InvariantViolation, Severity, VerificationReport};
