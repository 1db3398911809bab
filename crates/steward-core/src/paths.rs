use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const STEWARD_DIR: &str = ".steward";

pub const CONFIG_FILE: &str = ".steward/config.yaml";
pub const RULES_FILE: &str = ".steward/rules.yaml";
pub const LEDGER_FILE: &str = ".steward/ledger.redb";
pub const QUEUE_FILE: &str = ".steward/queue.jsonl";
pub const SUBJECTS_FILE: &str = ".steward/subjects.yaml";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn steward_dir(root: &Path) -> PathBuf {
    root.join(STEWARD_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

/// Resolve a configured path: absolute paths are kept, relative ones are
/// taken from the project root.
pub fn resolve(root: &Path, configured: &Path) -> PathBuf {
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        root.join(configured)
    }
}
