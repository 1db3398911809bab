use crate::output::print_json;
use steward_core::config::{Backend, Config};
use steward_core::{io, paths, rules};
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    io::ensure_dir(&paths::steward_dir(root))?;

    let mut created = Vec::new();

    let config = if paths::config_path(root).exists() {
        Config::load(root)?
    } else {
        let config = Config::default();
        config.save(root)?;
        created.push(paths::CONFIG_FILE.to_string());
        config
    };

    let rules_path = config.rule_set_path(root);
    if io::write_if_missing(&rules_path, rules::DEFAULT_RULES_YAML.as_bytes())? {
        created.push(config.rule_set_path.display().to_string());
    }

    if let Backend::Local { subjects_path, .. } = &config.backend {
        if io::write_if_missing(&paths::resolve(root, subjects_path), b"subjects: []\n")? {
            created.push(subjects_path.display().to_string());
        }
    }
    if let Some(queue_path) = config.backend.queue_path() {
        if io::write_if_missing(&paths::resolve(root, queue_path), b"")? {
            created.push(queue_path.display().to_string());
        }
    }

    // The ledger is local machine state
    io::ensure_gitignore_entry(root, &config.ledger_path.display().to_string())?;

    if json {
        print_json(&serde_json::json!({
            "root": root.display().to_string(),
            "created": created,
        }))?;
    } else {
        println!("Initialized steward in {}", paths::steward_dir(root).display());
        for path in &created {
            println!("  created {path}");
        }
    }
    Ok(())
}
