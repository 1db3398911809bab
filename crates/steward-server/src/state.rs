use std::path::{Path, PathBuf};
use std::sync::Arc;

use steward_core::config::Config;
use steward_core::paths;
use tokio::sync::Mutex;

pub const SECRET_ENV: &str = "STEWARD_WEBHOOK_SECRET";

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub root: PathBuf,
    pub queue_path: PathBuf,
    pub ledger_path: PathBuf,
    pub secret: Option<Arc<Vec<u8>>>,
    /// Serializes appends to the queue file.
    pub queue_lock: Arc<Mutex<()>>,
}

impl AppState {
    /// Resolve paths from `.steward/config.yaml`, falling back to the
    /// defaults when the project has no config yet. Deliveries land in the
    /// backend's queue, or the default queue for a polling backend. The
    /// webhook secret is read from `STEWARD_WEBHOOK_SECRET`.
    pub fn new(root: PathBuf) -> Self {
        let config = Config::load(&root).unwrap_or_default();
        let queue = config
            .backend
            .queue_path()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(paths::QUEUE_FILE));
        let secret = std::env::var(SECRET_ENV).ok().filter(|s| !s.is_empty());
        Self {
            queue_path: paths::resolve(&root, &queue),
            ledger_path: config.ledger_path(&root),
            root,
            secret: secret.map(|s| Arc::new(s.into_bytes())),
            queue_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_secret(mut self, secret: Option<String>) -> Self {
        self.secret = secret.map(|s| Arc::new(s.into_bytes()));
        self
    }
}
