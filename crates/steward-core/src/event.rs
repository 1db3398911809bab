//! Change events and the cursor used to resume fetching them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StewardError;
use crate::types::EventKind;

// ---------------------------------------------------------------------------
// ChangeEvent
// ---------------------------------------------------------------------------

/// A discrete, timestamped notification that something next to the
/// repository changed. Identity is `(kind, subject, timestamp)`; the payload
/// is opaque to the engine except for field lookups in rule conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: EventKind,
    pub subject: String,
    /// Seconds since the Unix epoch, as reported by the source.
    pub timestamp: i64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ChangeEvent {
    pub fn new(kind: EventKind, subject: impl Into<String>, timestamp: i64) -> Self {
        Self {
            kind,
            subject: subject.into(),
            timestamp,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn id(&self) -> EventId {
        EventId {
            kind: self.kind,
            subject: self.subject.clone(),
            timestamp: self.timestamp,
        }
    }

    /// Top-level payload field rendered as a string. Numbers and booleans are
    /// stringified; anything else is absent.
    pub fn payload_field(&self, field: &str) -> Option<String> {
        match self.payload.get(field)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// EventId
// ---------------------------------------------------------------------------

/// The idempotency key of a change event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId {
    pub kind: EventKind,
    pub subject: String,
    pub timestamp: i64,
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.kind, self.subject, self.timestamp)
    }
}

/// Parses the display form `kind:subject@timestamp`. The subject may itself
/// contain `:` or `@`; the kind ends at the first `:` and the timestamp
/// starts after the last `@`.
impl FromStr for EventId {
    type Err = StewardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || StewardError::InvalidEvent(format!("malformed event id: {s}"));
        let (kind, rest) = s.split_once(':').ok_or_else(malformed)?;
        let (subject, timestamp) = rest.rsplit_once('@').ok_or_else(malformed)?;
        if subject.is_empty() {
            return Err(malformed());
        }
        Ok(EventId {
            kind: kind.parse()?,
            subject: subject.to_string(),
            timestamp: timestamp.parse().map_err(|_| malformed())?,
        })
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Opaque resumption token handed out by an event source. Only the source
/// that produced it knows how to read it; callers persist it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub String);

impl Cursor {
    pub fn start() -> Self {
        Cursor(String::new())
    }

    pub fn is_start(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_start() {
            f.write_str("<start>")
        } else {
            f.write_str(&self.0)
        }
    }
}
