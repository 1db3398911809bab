use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// EventKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    NewItem,
    UpdatedItem,
    ClosedItem,
    ExternalTrigger,
}

impl EventKind {
    pub fn all() -> &'static [EventKind] {
        &[
            EventKind::NewItem,
            EventKind::UpdatedItem,
            EventKind::ClosedItem,
            EventKind::ExternalTrigger,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::NewItem => "new-item",
            EventKind::UpdatedItem => "updated-item",
            EventKind::ClosedItem => "closed-item",
            EventKind::ExternalTrigger => "external-trigger",
        }
    }

    /// Whether the subject of this event is expected to still be open in the
    /// snapshot. Closed items and external triggers are not checked for
    /// staleness.
    pub fn expects_live_subject(self) -> bool {
        matches!(self, EventKind::NewItem | EventKind::UpdatedItem)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = crate::error::StewardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::all()
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| crate::error::StewardError::InvalidEvent(format!("unknown event kind: {s}")))
    }
}

// ---------------------------------------------------------------------------
// ActionKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Comment,
    Label,
    Merge,
    Close,
    CreateBranch,
    Push,
    NoOp,
}

impl ActionKind {
    pub fn all() -> &'static [ActionKind] {
        &[
            ActionKind::Comment,
            ActionKind::Label,
            ActionKind::Merge,
            ActionKind::Close,
            ActionKind::CreateBranch,
            ActionKind::Push,
            ActionKind::NoOp,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Comment => "comment",
            ActionKind::Label => "label",
            ActionKind::Merge => "merge",
            ActionKind::Close => "close",
            ActionKind::CreateBranch => "create-branch",
            ActionKind::Push => "push",
            ActionKind::NoOp => "no-op",
        }
    }

    /// Kinds carried out through the remote API rather than the working copy.
    pub fn is_remote(self) -> bool {
        matches!(
            self,
            ActionKind::Comment | ActionKind::Label | ActionKind::Merge | ActionKind::Close
        )
    }

    pub fn is_mutating(self) -> bool {
        !matches!(self, ActionKind::NoOp)
    }

    /// Two kinds that cannot both be applied to the same target.
    pub fn conflicts_with(self, other: ActionKind) -> bool {
        matches!(
            (self, other),
            (ActionKind::Merge, ActionKind::Close) | (ActionKind::Close, ActionKind::Merge)
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = crate::error::StewardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::all()
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                crate::error::StewardError::InvalidRuleSet(format!("unknown action kind: {s}"))
            })
    }
}

// ---------------------------------------------------------------------------
// CheckStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passing,
    Failing,
    #[default]
    Pending,
}

impl CheckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckStatus::Passing => "passing",
            CheckStatus::Failing => "failing",
            CheckStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
