//! Proposed units of maintenance work and their fingerprints.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::event::EventId;
use crate::types::ActionKind;

/// Reason recorded on the no-op emitted for an event whose subject vanished.
pub const STALE_SUBJECT: &str = "stale-subject";

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Content-derived identity of an action: SHA-256 over the event identity,
/// the action kind and the target. Never depends on wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(event: &EventId, kind: ActionKind, target: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(event.kind.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(event.subject.as_bytes());
        hasher.update([0]);
        hasher.update(event.timestamp.to_string().as_bytes());
        hasher.update([0]);
        hasher.update(kind.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(target.as_bytes());
        Fingerprint(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First twelve hex digits, for log lines and tables.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Fingerprint(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    pub target: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    pub event: EventId,
    pub fingerprint: Fingerprint,
    /// Id of the rule that proposed this action; `None` for engine-made no-ops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
}

impl Action {
    pub fn new(
        event: EventId,
        kind: ActionKind,
        target: impl Into<String>,
        params: BTreeMap<String, String>,
    ) -> Self {
        let target = target.into();
        let fingerprint = Fingerprint::compute(&event, kind, &target);
        Self {
            kind,
            target,
            params,
            event,
            fingerprint,
            rule: None,
        }
    }

    /// The single action produced for an event whose subject no longer exists.
    pub fn stale_subject(event: EventId) -> Self {
        let target = event.subject.clone();
        let mut params = BTreeMap::new();
        params.insert("reason".to_string(), STALE_SUBJECT.to_string());
        Action::new(event, ActionKind::NoOp, target, params)
    }

    pub fn from_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Whether this action and `other` may not both be applied.
    pub fn conflicts_with(&self, other: &Action) -> bool {
        if self.target != other.target {
            return false;
        }
        // Same kind on same target would share a fingerprint
        self.kind == other.kind || self.kind.conflicts_with(other.kind)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.target)
    }
}
