use thiserror::Error;

#[derive(Debug, Error)]
pub enum StewardError {
    #[error("not initialized: run 'steward init'")]
    NotInitialized,

    #[error("repository unavailable at {path}: {reason}")]
    RepositoryUnavailable { path: String, reason: String },

    #[error("synchronization with remote failed: {0}")]
    SynchronizationFailed(String),

    #[error("transient event source error: {0}")]
    TransientSource(String),

    #[error("transient execution error: {0}")]
    TransientExecution(String),

    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("ledger integrity violated for {fingerprint}: {reason}")]
    LedgerIntegrity { fingerprint: String, reason: String },

    #[error("ledger storage error: {0}")]
    Ledger(String),

    #[error("invalid rule set: {0}")]
    InvalidRuleSet(String),

    #[error("template '{0}' already exists; use edit to change it")]
    TemplateExists(String),

    #[error("template '{0}' not found")]
    TemplateNotFound(String),

    #[error("template '{name}' is used by rule(s) {rules}")]
    TemplateInUse { name: String, rules: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("event {event}, action {fingerprint}: {source}")]
    InAction {
        event: String,
        fingerprint: String,
        #[source]
        source: Box<StewardError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StewardError {
    /// Retryable failures send the driver into `ErrorBackoff`; everything
    /// else halts the cycle immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            StewardError::SynchronizationFailed(_)
            | StewardError::TransientSource(_)
            | StewardError::TransientExecution(_) => true,
            StewardError::InAction { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Attach the event and fingerprint an error occurred under.
    pub fn in_action(self, event: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        StewardError::InAction {
            event: event.into(),
            fingerprint: fingerprint.into(),
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, StewardError>;
