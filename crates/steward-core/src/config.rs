use crate::error::{Result, StewardError};
use crate::paths;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Where events come from and where remote actions go.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backend {
    /// Events from the JSONL queue, subjects from a YAML file.
    Local {
        #[serde(default = "default_queue_path")]
        queue_path: PathBuf,
        #[serde(default = "default_subjects_path")]
        subjects_path: PathBuf,
    },
    Github {
        /// `owner/name`
        repo: String,
        #[serde(default = "default_token_env")]
        token_env: String,
        #[serde(default = "default_api_url")]
        api_url: String,
    },
    /// Events from the queue the webhook receiver fills; subjects and
    /// remote actions through the GitHub API.
    GithubWebhook {
        /// `owner/name`
        repo: String,
        #[serde(default = "default_token_env")]
        token_env: String,
        #[serde(default = "default_api_url")]
        api_url: String,
        #[serde(default = "default_queue_path")]
        queue_path: PathBuf,
    },
}

impl Backend {
    /// Queue file events are read from, for backends fed by one.
    pub fn queue_path(&self) -> Option<&Path> {
        match self {
            Backend::Local { queue_path, .. } | Backend::GithubWebhook { queue_path, .. } => {
                Some(queue_path)
            }
            Backend::Github { .. } => None,
        }
    }
}

fn default_queue_path() -> PathBuf {
    PathBuf::from(paths::QUEUE_FILE)
}

fn default_subjects_path() -> PathBuf {
    PathBuf::from(paths::SUBJECTS_FILE)
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Local {
            queue_path: default_queue_path(),
            subjects_path: default_subjects_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_rule_set_path")]
    pub rule_set_path: PathBuf,
    #[serde(
        default = "default_poll_interval",
        serialize_with = "serialize_secs",
        deserialize_with = "deserialize_secs"
    )]
    pub poll_interval: Duration,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(
        default = "default_backoff_base",
        serialize_with = "serialize_secs",
        deserialize_with = "deserialize_secs"
    )]
    pub backoff_base: Duration,
    #[serde(
        default = "default_max_backoff",
        serialize_with = "serialize_secs",
        deserialize_with = "deserialize_secs"
    )]
    pub max_backoff: Duration,
    /// Deadline applied to every network and git call.
    #[serde(
        default = "default_io_deadline",
        serialize_with = "serialize_secs",
        deserialize_with = "deserialize_secs"
    )]
    pub io_deadline: Duration,
    #[serde(default)]
    pub dry_run: bool,
    /// Git remote to synchronize from and push to. `null` keeps the working
    /// copy local.
    #[serde(default = "default_remote")]
    pub remote: Option<String>,
    /// Branch to track; defaults to whatever is checked out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    #[serde(default)]
    pub backend: Backend,
}

fn default_rule_set_path() -> PathBuf {
    PathBuf::from(paths::RULES_FILE)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_base() -> Duration {
    Duration::from_secs(2)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(300)
}

fn default_io_deadline() -> Duration {
    Duration::from_secs(30)
}

fn default_remote() -> Option<String> {
    Some("origin".to_string())
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from(paths::LEDGER_FILE)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rule_set_path: default_rule_set_path(),
            poll_interval: default_poll_interval(),
            max_retries: default_max_retries(),
            backoff_base: default_backoff_base(),
            max_backoff: default_max_backoff(),
            io_deadline: default_io_deadline(),
            dry_run: false,
            remote: default_remote(),
            branch: None,
            ledger_path: default_ledger_path(),
            backend: Backend::default(),
        }
    }
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(StewardError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)
            .map_err(|e| StewardError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn rule_set_path(&self, root: &Path) -> PathBuf {
        paths::resolve(root, &self.rule_set_path)
    }

    pub fn ledger_path(&self, root: &Path) -> PathBuf {
        paths::resolve(root, &self.ledger_path)
    }

    /// Delay before retry `attempt` (1-based): `backoff_base * 2^(attempt-1)`,
    /// capped at `max_backoff`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.backoff_base
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self, root: &Path) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.poll_interval.is_zero() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "poll_interval must be at least 1 second".into(),
            });
        }
        if self.io_deadline.is_zero() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "io_deadline must be at least 1 second".into(),
            });
        }
        if self.backoff_base > self.max_backoff {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "backoff_base ({}s) exceeds max_backoff ({}s); every retry waits max_backoff",
                    self.backoff_base.as_secs(),
                    self.max_backoff.as_secs()
                ),
            });
        }
        if !self.rule_set_path(root).exists() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!("rule set not found: {}", self.rule_set_path.display()),
            });
        }
        match &self.backend {
            Backend::Github { repo, token_env, .. }
            | Backend::GithubWebhook {
                repo, token_env, ..
            } => {
                if repo.split('/').filter(|p| !p.is_empty()).count() != 2 {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Error,
                        message: format!("backend.repo '{repo}' is not owner/name"),
                    });
                }
                if std::env::var(token_env).is_err() {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Warning,
                        message: format!("{token_env} is not set"),
                    });
                }
            }
            Backend::Local { subjects_path, .. } => {
                if !paths::resolve(root, subjects_path).exists() {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Warning,
                        message: format!(
                            "subjects file {} does not exist yet; no subjects will be known",
                            subjects_path.display()
                        ),
                    });
                }
            }
        }
        if self.remote.is_none() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "remote is null: working copy is never synchronized and push actions fail"
                    .into(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Serde helpers for Duration (serialized as seconds: u64)
// ---------------------------------------------------------------------------

fn serialize_secs<S>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.serialize_u64(d.as_secs())
}

fn deserialize_secs<'de, D>(d: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(d)?;
    Ok(Duration::from_secs(secs))
}
