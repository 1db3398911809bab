use steward_core::StewardError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("github {operation} request failed: {source}")]
    Transport {
        operation: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("github {operation} returned {status}: {message}")]
    Status {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("failed to decode github {operation} response: {source}")]
    Decode {
        operation: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid repository '{0}', expected owner/name")]
    InvalidRepo(String),

    #[error("environment variable {0} is not set")]
    MissingToken(String),

    #[error("token is not a valid header value")]
    InvalidToken,

    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, GitHubError>;

impl GitHubError {
    pub fn status(&self) -> Option<u16> {
        match self {
            GitHubError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        match self {
            GitHubError::Status {
                status: 401, ..
            } => true,
            // 403 is also how secondary rate limits are reported
            GitHubError::Status {
                status: 403,
                message,
                ..
            } => !message.to_ascii_lowercase().contains("rate limit"),
            GitHubError::MissingToken(_) => true,
            _ => false,
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            GitHubError::Transport { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            GitHubError::Status { status, .. } => {
                *status == 429 || *status >= 500 || (*status == 403 && !self.is_auth())
            }
            _ => false,
        }
    }

    /// Classify a failure raised while reading events or subjects.
    pub fn into_source(self) -> StewardError {
        if self.is_auth() {
            StewardError::Authentication(self.to_string())
        } else if self.is_transient() {
            StewardError::TransientSource(self.to_string())
        } else {
            StewardError::InvalidConfig(self.to_string())
        }
    }

    /// Classify a failure raised while applying an action.
    pub fn into_execution(self) -> StewardError {
        if self.is_auth() {
            StewardError::Authentication(self.to_string())
        } else {
            StewardError::TransientExecution(self.to_string())
        }
    }
}
