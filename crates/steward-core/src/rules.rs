//! Declarative rule set: ordered `(conditions, action template, priority)`
//! tuples loaded from YAML and evaluated by the decision engine.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StewardError};
use crate::event::ChangeEvent;
use crate::snapshot::RepositorySnapshot;
use crate::types::{ActionKind, CheckStatus, EventKind};

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSetFile {
    /// Named reply texts usable by any rule through `then.template`.
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
    #[serde(default)]
    pub rules: Vec<RuleDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDef {
    pub id: String,
    /// Higher wins when two proposed actions conflict.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub when: Conditions,
    pub then: ActionTemplate,
}

/// All present conditions must hold. An empty block matches every event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conditions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventKind>,
    /// Regex over the event subject id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub without_labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checks: Option<CheckStatus>,
    /// Regex; at least one changed path must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub payload: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionTemplate {
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
    /// Name of a template whose rendered text becomes `params.body`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl RuleSetFile {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(StewardError::InvalidRuleSet(format!(
                "rule set not found: {}",
                path.display()
            )));
        }
        let data = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&data).map_err(|e| StewardError::InvalidRuleSet(e.to_string()))
    }

    /// Write the file back after checking that it still compiles. Comments
    /// in the original YAML are not preserved.
    pub fn save(&self, path: &Path) -> Result<()> {
        RuleSet::compile(self.clone())?;
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    /// Ids of the rules whose `then.template` names `name`.
    pub fn rules_using(&self, name: &str) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| r.then.template.as_deref() == Some(name))
            .map(|r| r.id.as_str())
            .collect()
    }

    pub fn add_template(&mut self, name: &str, text: &str) -> Result<()> {
        check_template(name, text)?;
        if self.templates.contains_key(name) {
            return Err(StewardError::TemplateExists(name.to_string()));
        }
        self.templates.insert(name.to_string(), text.to_string());
        Ok(())
    }

    pub fn edit_template(&mut self, name: &str, text: &str) -> Result<()> {
        check_template(name, text)?;
        match self.templates.get_mut(name) {
            Some(existing) => {
                *existing = text.to_string();
                Ok(())
            }
            None => Err(StewardError::TemplateNotFound(name.to_string())),
        }
    }

    /// Remove an unused template. A template a rule still references stays.
    pub fn remove_template(&mut self, name: &str) -> Result<()> {
        if !self.templates.contains_key(name) {
            return Err(StewardError::TemplateNotFound(name.to_string()));
        }
        let users = self.rules_using(name);
        if !users.is_empty() {
            return Err(StewardError::TemplateInUse {
                name: name.to_string(),
                rules: users.join(", "),
            });
        }
        self.templates.remove(name);
        Ok(())
    }
}

fn check_template(name: &str, text: &str) -> Result<()> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(StewardError::InvalidRuleSet(format!(
            "template name '{name}' must be a single non-empty word"
        )));
    }
    if text.trim().is_empty() {
        return Err(StewardError::InvalidRuleSet(format!(
            "template '{name}' has no text"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Compiled rules
// ---------------------------------------------------------------------------

pub struct Rule {
    pub def: RuleDef,
    /// Declaration index, used to break priority ties.
    pub order: usize,
    subject_re: Option<Regex>,
    paths_re: Option<Regex>,
}

impl Rule {
    pub fn id(&self) -> &str {
        &self.def.id
    }

    pub fn priority(&self) -> i32 {
        self.def.priority
    }

    pub fn matches(&self, snapshot: &RepositorySnapshot, event: &ChangeEvent) -> bool {
        let when = &self.def.when;

        if !when.events.is_empty() && !when.events.contains(&event.kind) {
            return false;
        }
        if let Some(re) = &self.subject_re {
            if !re.is_match(&event.subject) {
                return false;
            }
        }
        if let Some(branch) = &when.branch {
            if &snapshot.branch != branch {
                return false;
            }
        }
        if let Some(re) = &self.paths_re {
            if !snapshot.changed_paths.iter().any(|p| re.is_match(p)) {
                return false;
            }
        }
        for (field, expected) in &when.payload {
            if event.payload_field(field).as_deref() != Some(expected.as_str()) {
                return false;
            }
        }

        let needs_subject = !when.labels.is_empty()
            || !when.without_labels.is_empty()
            || when.checks.is_some()
            || when.open.is_some();
        if !needs_subject {
            return true;
        }
        let Some(subject) = snapshot.subject(&event.subject) else {
            return false;
        };
        if !when.labels.iter().all(|l| subject.has_label(l)) {
            return false;
        }
        if when.without_labels.iter().any(|l| subject.has_label(l)) {
            return false;
        }
        if let Some(checks) = when.checks {
            if subject.checks != checks {
                return false;
            }
        }
        if let Some(open) = when.open {
            if subject.open != open {
                return false;
            }
        }
        true
    }

    fn target_template(&self) -> &str {
        self.def.then.target.as_deref().unwrap_or("{subject}")
    }
}

/// Two rules that can propose incompatible actions for the same event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleConflict {
    pub winner: String,
    pub loser: String,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// RuleSet
// ---------------------------------------------------------------------------

pub struct RuleSet {
    rules: Vec<Rule>,
    templates: BTreeMap<String, String>,
}

impl RuleSet {
    pub fn load(path: &Path) -> Result<Self> {
        Self::compile(RuleSetFile::load(path)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: RuleSetFile = serde_yaml::from_str(yaml)
            .map_err(|e| StewardError::InvalidRuleSet(e.to_string()))?;
        Self::compile(file)
    }

    pub fn compile(file: RuleSetFile) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(file.rules.len());

        for (order, def) in file.rules.into_iter().enumerate() {
            if def.id.trim().is_empty() {
                return Err(StewardError::InvalidRuleSet(format!(
                    "rule #{} has an empty id",
                    order + 1
                )));
            }
            if !seen.insert(def.id.clone()) {
                return Err(StewardError::InvalidRuleSet(format!(
                    "duplicate rule id '{}'",
                    def.id
                )));
            }
            if let Some(name) = &def.then.template {
                if !file.templates.contains_key(name) {
                    return Err(StewardError::InvalidRuleSet(format!(
                        "rule '{}' references unknown template '{name}'",
                        def.id
                    )));
                }
            }
            let subject_re = compile_re(&def.id, "subject", def.when.subject.as_deref())?;
            let paths_re = compile_re(&def.id, "paths", def.when.paths.as_deref())?;
            rules.push(Rule {
                def,
                order,
                subject_re,
                paths_re,
            });
        }

        Ok(Self {
            rules,
            templates: file.templates,
        })
    }

    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            templates: BTreeMap::new(),
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn template(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Pairs of rules that may propose conflicting actions on the same target
    /// for the same event. Only targets written identically are compared;
    /// the engine still resolves every conflict at decision time.
    pub fn conflicts(&self) -> Vec<RuleConflict> {
        let mut out = Vec::new();
        for (i, a) in self.rules.iter().enumerate() {
            for b in &self.rules[i + 1..] {
                let (ka, kb) = (a.def.then.kind, b.def.then.kind);
                if ka == ActionKind::NoOp || kb == ActionKind::NoOp {
                    continue;
                }
                if !(ka == kb || ka.conflicts_with(kb)) {
                    continue;
                }
                if a.target_template() != b.target_template() {
                    continue;
                }
                if !events_overlap(&a.def.when.events, &b.def.when.events) {
                    continue;
                }
                let (winner, loser) = if b.priority() > a.priority() { (b, a) } else { (a, b) };
                out.push(RuleConflict {
                    winner: winner.id().to_string(),
                    loser: loser.id().to_string(),
                    reason: format!("{ka} vs {kb} on {}", a.target_template()),
                });
            }
        }
        out
    }
}

fn compile_re(rule: &str, field: &str, pattern: Option<&str>) -> Result<Option<Regex>> {
    pattern
        .map(|p| {
            Regex::new(p).map_err(|e| {
                StewardError::InvalidRuleSet(format!("rule '{rule}': bad {field} pattern: {e}"))
            })
        })
        .transpose()
}

fn events_overlap(a: &[EventKind], b: &[EventKind]) -> bool {
    a.is_empty() || b.is_empty() || a.iter().any(|k| b.contains(k))
}

// ---------------------------------------------------------------------------
// Placeholder rendering
// ---------------------------------------------------------------------------

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| {
        Regex::new(r"\{([a-z_]+(?:\.[A-Za-z0-9_\-]+)?)\}").expect("placeholder pattern is valid")
    })
}

/// Expand `{subject}`, `{kind}`, `{timestamp}`, `{branch}`, `{head}` and
/// `{payload.<field>}`. Unknown placeholders are left untouched.
pub fn render(text: &str, snapshot: &RepositorySnapshot, event: &ChangeEvent) -> String {
    placeholder_re()
        .replace_all(text, |caps: &regex::Captures| {
            let key = &caps[1];
            match key {
                "subject" => event.subject.clone(),
                "kind" => event.kind.to_string(),
                "timestamp" => event.timestamp.to_string(),
                "branch" => snapshot.branch.clone(),
                "head" => snapshot.head.clone(),
                _ => match key.strip_prefix("payload.") {
                    Some(field) => event.payload_field(field).unwrap_or_default(),
                    None => caps[0].to_string(),
                },
            }
        })
        .into_owned()
}

// ---------------------------------------------------------------------------
// Default rule set
// ---------------------------------------------------------------------------

/// Rules written by `steward init`.
pub const DEFAULT_RULES_YAML: &str = r#"templates:
  welcome: "Thanks for opening {subject}! A maintainer will triage it shortly."
  declined: "Thank you for your interest, but this cannot be accepted at this time."
rules:
  - id: merge-ready
    priority: 100
    when:
      events: [updated-item]
      subject: "^PR-"
      labels: [ready]
      without_labels: [hold]
      checks: passing
    then:
      kind: merge
      params:
        method: squash
  - id: close-declined
    priority: 50
    when:
      events: [updated-item]
      labels: [declined]
    then:
      kind: close
  - id: explain-declined
    priority: 50
    when:
      events: [updated-item]
      labels: [declined]
    then:
      kind: comment
      template: declined
  - id: welcome
    when:
      events: [new-item]
    then:
      kind: comment
      template: welcome
  - id: triage
    when:
      events: [new-item]
      subject: "^ISSUE-"
    then:
      kind: label
      params:
        labels: needs-triage
  - id: record-maintainer
    priority: 10
    when:
      events: [updated-item]
      labels: [accepted]
    then:
      kind: push
      target: "branch/{branch}"
      params:
        path: maintainers.mk
        append_line: "{payload.alias}"
        message: "Add maintainer: {payload.alias}"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Subject;

    fn event(kind: EventKind, subject: &str) -> ChangeEvent {
        ChangeEvent::new(kind, subject, 100)
    }

    #[test]
    fn default_rules_compile() {
        let rules = RuleSet::from_yaml(DEFAULT_RULES_YAML).unwrap();
        assert_eq!(rules.rules().len(), 6);
        assert!(rules.template("welcome").is_some());
    }

    fn default_file() -> RuleSetFile {
        serde_yaml::from_str(DEFAULT_RULES_YAML).unwrap()
    }

    #[test]
    fn add_template_refuses_existing_name() {
        let mut file = default_file();
        file.add_template("thanks", "Thanks, {subject}!").unwrap();
        assert_eq!(file.templates["thanks"], "Thanks, {subject}!");

        let err = file.add_template("welcome", "Hi").unwrap_err();
        assert!(matches!(err, StewardError::TemplateExists(ref n) if n == "welcome"));
        assert!(err.to_string().contains("use edit"), "{err}");
    }

    #[test]
    fn edit_template_requires_existing_name() {
        let mut file = default_file();
        file.edit_template("welcome", "Hello {subject}").unwrap();
        assert_eq!(file.templates["welcome"], "Hello {subject}");
        assert!(matches!(
            file.edit_template("nope", "x"),
            Err(StewardError::TemplateNotFound(_))
        ));
    }

    #[test]
    fn remove_template_refuses_unknown_and_referenced() {
        let mut file = default_file();
        assert!(matches!(
            file.remove_template("nope"),
            Err(StewardError::TemplateNotFound(_))
        ));
        let err = file.remove_template("declined").unwrap_err();
        assert!(err.to_string().contains("explain-declined"), "{err}");

        file.add_template("spare", "unused").unwrap();
        file.remove_template("spare").unwrap();
        assert!(!file.templates.contains_key("spare"));
    }

    #[test]
    fn template_names_and_text_are_checked() {
        let mut file = RuleSetFile::default();
        assert!(file.add_template("two words", "x").is_err());
        assert!(file.add_template("", "x").is_err());
        assert!(file.add_template("blank", "  ").is_err());
    }

    #[test]
    fn saved_file_reloads_with_same_rules() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rules.yaml");
        let mut file = default_file();
        file.add_template("thanks", "Thanks!").unwrap();
        file.save(&path).unwrap();

        let rules = RuleSet::load(&path).unwrap();
        assert_eq!(rules.rules().len(), 6);
        assert_eq!(rules.template("thanks"), Some("Thanks!"));
        assert_eq!(rules.rules()[0].id(), "merge-ready");
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let yaml = "rules:\n  - id: a\n    then: {kind: label}\n  - id: a\n    then: {kind: close}\n";
        let err = RuleSet::from_yaml(yaml).err().unwrap();
        assert!(err.to_string().contains("duplicate rule id"), "{err}");
    }

    #[test]
    fn unknown_template_is_rejected() {
        let yaml = "rules:\n  - id: a\n    then: {kind: comment, template: nope}\n";
        assert!(RuleSet::from_yaml(yaml).is_err());
    }

    #[test]
    fn bad_regex_is_rejected() {
        let yaml = "rules:\n  - id: a\n    when: {subject: \"(\"}\n    then: {kind: label}\n";
        let err = RuleSet::from_yaml(yaml).err().unwrap();
        assert!(err.to_string().contains("bad subject pattern"), "{err}");
    }

    #[test]
    fn matches_labels_and_checks() {
        let rules = RuleSet::from_yaml(DEFAULT_RULES_YAML).unwrap();
        let merge = &rules.rules()[0];
        let ready = RepositorySnapshot::new("main", "h1").with_subject(
            Subject::new("PR-42")
                .with_labels(&["ready"])
                .with_checks(CheckStatus::Passing),
        );
        assert!(merge.matches(&ready, &event(EventKind::UpdatedItem, "PR-42")));
        assert!(!merge.matches(&ready, &event(EventKind::NewItem, "PR-42")));

        let held = RepositorySnapshot::new("main", "h1").with_subject(
            Subject::new("PR-42")
                .with_labels(&["ready", "hold"])
                .with_checks(CheckStatus::Passing),
        );
        assert!(!merge.matches(&held, &event(EventKind::UpdatedItem, "PR-42")));

        let failing = RepositorySnapshot::new("main", "h1").with_subject(
            Subject::new("PR-42")
                .with_labels(&["ready"])
                .with_checks(CheckStatus::Failing),
        );
        assert!(!merge.matches(&failing, &event(EventKind::UpdatedItem, "PR-42")));
    }

    #[test]
    fn matches_paths_and_payload() {
        let yaml = r#"
rules:
  - id: docs
    when:
      paths: "^docs/"
      payload: { action: synchronize }
    then: { kind: label, params: { labels: docs } }
"#;
        let rules = RuleSet::from_yaml(yaml).unwrap();
        let rule = &rules.rules()[0];
        let snap = RepositorySnapshot::new("main", "h").with_changed_paths(&["docs/a.md", "src/lib.rs"]);
        let ev = event(EventKind::UpdatedItem, "PR-1")
            .with_payload(serde_json::json!({"action": "synchronize"}));
        assert!(rule.matches(&snap, &ev));
        let other = event(EventKind::UpdatedItem, "PR-1")
            .with_payload(serde_json::json!({"action": "opened"}));
        assert!(!rule.matches(&snap, &other));
        let no_docs = RepositorySnapshot::new("main", "h").with_changed_paths(&["src/lib.rs"]);
        assert!(!rule.matches(&no_docs, &ev));
    }

    #[test]
    fn render_expands_placeholders() {
        let snap = RepositorySnapshot::new("main", "deadbeef");
        let ev = event(EventKind::UpdatedItem, "PR-42")
            .with_payload(serde_json::json!({"alias": "johndoe"}));
        assert_eq!(
            render("{subject} on {branch}@{head} by {payload.alias}{payload.none} {other}", &snap, &ev),
            "PR-42 on main@deadbeef by johndoe {other}"
        );
    }

    #[test]
    fn conflicts_report_priority_winner() {
        let rules = RuleSet::from_yaml(DEFAULT_RULES_YAML).unwrap();
        let conflicts = rules.conflicts();
        let merge_close = conflicts
            .iter()
            .find(|c| c.reason.starts_with("merge vs close"))
            .expect("merge-ready and close-declined overlap");
        assert_eq!(merge_close.winner, "merge-ready");
        assert_eq!(merge_close.loser, "close-declined");
    }
}
