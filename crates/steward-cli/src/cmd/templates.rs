use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use std::io::Read;
use std::path::Path;
use steward_core::config::Config;
use steward_core::rules::RuleSetFile;

#[derive(Subcommand)]
pub enum TemplatesSubcommand {
    /// List reply templates and the rules that use them
    List,

    /// Add a template; the text is read from stdin when omitted
    Add { name: String, text: Option<String> },

    /// Replace the text of an existing template
    Edit { name: String, text: Option<String> },

    /// Remove a template no rule references
    Remove { name: String },
}

pub fn run(root: &Path, subcmd: TemplatesSubcommand, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let path = config.rule_set_path(root);

    match subcmd {
        TemplatesSubcommand::List => list(&path, json),
        TemplatesSubcommand::Add { name, text } => {
            let text = text_or_stdin(text)?;
            update(&path, &name, "added", json, |file| file.add_template(&name, &text))
        }
        TemplatesSubcommand::Edit { name, text } => {
            let text = text_or_stdin(text)?;
            update(&path, &name, "updated", json, |file| file.edit_template(&name, &text))
        }
        TemplatesSubcommand::Remove { name } => {
            update(&path, &name, "removed", json, |file| file.remove_template(&name))
        }
    }
}

fn text_or_stdin(text: Option<String>) -> anyhow::Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("failed to read template text from stdin")?;
    Ok(buf.trim_end().to_string())
}

fn update(
    path: &Path,
    name: &str,
    verb: &str,
    json: bool,
    change: impl FnOnce(&mut RuleSetFile) -> steward_core::Result<()>,
) -> anyhow::Result<()> {
    let mut file = RuleSetFile::load(path)?;
    change(&mut file)?;
    file.save(path)
        .with_context(|| format!("cannot write {}", path.display()))?;

    if json {
        print_json(&serde_json::json!({ "template": name, "result": verb }))?;
    } else {
        println!("Template '{name}' {verb}.");
    }
    Ok(())
}

fn list(path: &Path, json: bool) -> anyhow::Result<()> {
    let file = RuleSetFile::load(path)?;

    if json {
        let templates: Vec<_> = file
            .templates
            .iter()
            .map(|(name, text)| {
                serde_json::json!({
                    "name": name,
                    "text": text,
                    "used_by": file.rules_using(name),
                })
            })
            .collect();
        return print_json(&serde_json::json!({
            "path": path.display().to_string(),
            "templates": templates,
        }));
    }

    if file.templates.is_empty() {
        println!("No templates in {}.", path.display());
        return Ok(());
    }
    let rows = file
        .templates
        .iter()
        .map(|(name, text)| {
            let users = file.rules_using(name);
            vec![
                name.clone(),
                if users.is_empty() {
                    "-".to_string()
                } else {
                    users.join(",")
                },
                text.replace('\n', " "),
            ]
        })
        .collect();
    print_table(&["TEMPLATE", "USED BY", "TEXT"], rows);
    Ok(())
}
