//! In-memory fake for the ledger trait (testing only)
//!
//! `MemoryLedger` satisfies the [`EventLedger`] contract without touching the
//! filesystem. Offsets are record indices. Availability can be toggled to
//! exercise fail-closed paths.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::LedgerError;
use crate::event::Event;
use crate::storage_traits::*;

/// In-memory ledger backed by a `Vec<Event>`.
#[derive(Debug)]
pub struct MemoryLedger {
    events: Mutex<Vec<Event>>,
    available: AtomicBool,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a ledger with existing history.
    pub fn with_events(events: Vec<Event>) -> Self {
        Self {
            events: Mutex::new(events),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Snapshot of every stored event.
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count stored events of a given type.
    pub fn count_type(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    fn check_available(&self) -> LedgerResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LedgerError::Unavailable {
                path: PathBuf::from("memory://ledger"),
                reason: "store marked unavailable".to_string(),
            })
        }
    }
}

#[async_trait]
impl EventLedger for MemoryLedger {
    async fn append(&self, event: &Event) -> LedgerResult<()> {
        self.check_available()?;
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn read_from(&self, offset: LedgerOffset) -> LedgerResult<ReadBatch> {
        self.check_available()?;
        let events = self.events.lock().unwrap();
        let len = events.len() as u64;
        if offset.0 > len {
            return Err(LedgerError::OffsetOutOfRange {
                offset: offset.0,
                len,
            });
        }
        Ok(ReadBatch {
            events: events[offset.0 as usize..].to_vec(),
            next_offset: LedgerOffset(len),
        })
    }
}
