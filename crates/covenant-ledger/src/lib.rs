//! Covenant-Ledger: append-only event store for governed agent activity
//!
//! Every governed action (a sealed change, a recorded violation, an
//! attestation) becomes one immutable [`Event`]. Nothing else may mutate
//! history once written.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: ordering, atomic appends, and exactly-once incremental reads.
//!
//! ## Key Components
//!
//! - `EventLedger`: async storage contract (`append`, `read_all`, `read_from`)
//! - `JsonlLedger`: one JSON object per line on local disk
//! - `MemoryLedger`: in-memory fake with failure injection

mod error;
pub mod event;
pub mod fakes;
pub mod jsonl;
pub mod storage_traits;

pub use error::LedgerError;
pub use event::{event_types, now_timestamp, Event};
pub use jsonl::{JsonlLedger, DEFAULT_IO_TIMEOUT, DEFAULT_LEDGER_FILE};
pub use storage_traits::{EventLedger, LedgerOffset, LedgerResult, ReadBatch};
