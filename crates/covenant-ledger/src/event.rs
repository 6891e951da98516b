//! The governed event record.

use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known event types emitted or inspected by the governance layer.
pub mod event_types {
    /// A verified change was durably committed by the Sealer.
    pub const SEALED: &str = "SEALED";
    /// The Sealer refused a change on policy grounds.
    pub const SEAL_REJECTED: &str = "SEAL_REJECTED";
    /// An invariant violation recorded by the Watchdog.
    pub const VIOLATION: &str = "VIOLATION";
    /// The Watchdog entered its terminal halted state.
    pub const WATCHDOG_HALTED: &str = "WATCHDOG_HALTED";
    /// A component published its attestation.
    pub const ATTESTATION: &str = "ATTESTATION";
    pub const BROADCAST: &str = "BROADCAST";
    pub const LICENSE_VALID: &str = "LICENSE_VALID";
    pub const CONSTITUTION_DELETED: &str = "CONSTITUTION_DELETED";
    pub const PROPOSAL_CREATED: &str = "PROPOSAL_CREATED";
    pub const PROPOSAL_VOTED: &str = "PROPOSAL_VOTED";
    pub const PROPOSAL_PASSED: &str = "PROPOSAL_PASSED";
    pub const PROPOSAL_EXECUTED: &str = "PROPOSAL_EXECUTED";
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// A single immutable record in the ledger.
///
/// Identity is the full tuple of fields: two events with equal
/// `(event_type, agent_id, task_id, timestamp, payload)` are duplicates.
/// Unknown fields in stored records are ignored on read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event classification (e.g. `SEALED`, `BROADCAST`).
    pub event_type: String,

    /// Agent or component that performed the governed action.
    pub agent_id: String,

    /// Correlation key of the originating task.
    #[serde(default)]
    pub task_id: Option<String>,

    /// ISO-8601 timestamp.
    pub timestamp: String,

    /// Event-specific payload.
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Event {
    /// Create an event stamped with the current UTC time.
    pub fn new(
        event_type: impl Into<String>,
        agent_id: impl Into<String>,
        task_id: Option<String>,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            agent_id: agent_id.into(),
            task_id,
            timestamp: now_timestamp(),
            payload,
        }
    }

    /// Create an event with an explicit timestamp.
    pub fn at(
        event_type: impl Into<String>,
        agent_id: impl Into<String>,
        task_id: Option<&str>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            agent_id: agent_id.into(),
            task_id: task_id.map(ToString::to_string),
            timestamp: timestamp.into(),
            payload: Map::new(),
        }
    }

    /// Builder: set a payload field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// The task id if present and not blank.
    pub fn task(&self) -> Option<&str> {
        self.task_id
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Parse the ISO-8601 timestamp. RFC 3339 is tried first; a timestamp
    /// without an offset (`2026-01-01T00:00:10`, with `T` or a space, with or
    /// without fractional seconds) is read as UTC. `None` when neither form
    /// parses.
    pub fn parsed_timestamp(&self) -> Option<DateTime<FixedOffset>> {
        let raw = self.timestamp.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts);
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .map(|naive| naive.and_utc().fixed_offset())
    }

    /// Canonical identity key used for duplicate detection.
    ///
    /// Payload keys are sorted recursively, so equal tuples always serialize
    /// to the same string regardless of insertion order.
    pub fn identity_key(&self) -> String {
        let payload = canonical(&Value::Object(self.payload.clone()));
        let tuple = (
            &self.event_type,
            &self.agent_id,
            &self.task_id,
            &self.timestamp,
            &payload,
        );
        serde_json::to_string(&tuple).unwrap_or_else(|_| format!("{:?}", tuple))
    }

    /// Read a string payload field.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonical(&map[key.as_str()]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

/// Current UTC time as an RFC 3339 string with microsecond precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
