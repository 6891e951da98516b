//! Storage trait definitions for the governance ledger.
//!
//! `EventLedger` is the only path through which history is written. It is
//! async and backend-agnostic; a JSONL file backend lives in [`crate::jsonl`]
//! and an in-memory fake for tests in [`crate::fakes`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::event::Event;

/// Result type for ledger operations
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Opaque read cursor returned by [`EventLedger::read_from`].
///
/// The unit is backend-defined (byte offset for files, record index for the
/// in-memory fake). Callers only ever pass back a value they received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LedgerOffset(pub u64);

impl LedgerOffset {
    /// Cursor positioned before the first record.
    pub const fn start() -> Self {
        LedgerOffset(0)
    }
}

impl std::fmt::Display for LedgerOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events read from a cursor plus the cursor to resume from.
#[derive(Debug, Clone, Default)]
pub struct ReadBatch {
    pub events: Vec<Event>,
    pub next_offset: LedgerOffset,
}

/// Append-only governed event ledger.
///
/// Guarantees:
/// - `append` is the only mutator and preserves arrival order.
/// - A record is either fully visible to readers or not at all.
/// - Chaining `read_from` through the returned offsets yields every record
///   exactly once; repeating a call with the same offset returns the same
///   prefix of records.
#[async_trait]
pub trait EventLedger: Send + Sync {
    /// Append one event. Fails with `LedgerError::Unavailable` when the store
    /// cannot be written. A `LedgerError::Timeout` means the record was not
    /// written, so retrying cannot duplicate it.
    async fn append(&self, event: &Event) -> LedgerResult<()>;

    /// Read every record from `offset` onward.
    async fn read_from(&self, offset: LedgerOffset) -> LedgerResult<ReadBatch>;

    /// Read the whole ledger in order.
    async fn read_all(&self) -> LedgerResult<Vec<Event>> {
        Ok(self.read_from(LedgerOffset::start()).await?.events)
    }
}
