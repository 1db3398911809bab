pub mod config;
pub mod decide;
pub mod enqueue;
pub mod init;
pub mod ledger;
pub mod rules;
pub mod run;
pub mod serve;
pub mod templates;

use anyhow::Context;
use steward_core::event::ChangeEvent;
use steward_core::types::EventKind;

/// Event described on the command line.
pub struct EventArgs {
    pub kind: String,
    pub subject: String,
    pub timestamp: Option<i64>,
    pub payload: Option<String>,
}

impl EventArgs {
    pub fn into_event(self) -> anyhow::Result<ChangeEvent> {
        let kind: EventKind = self.kind.parse()?;
        let subject = self.subject.trim();
        if subject.is_empty() {
            anyhow::bail!("subject must not be empty");
        }
        let timestamp = self
            .timestamp
            .unwrap_or_else(|| chrono::Utc::now().timestamp());
        let payload = match self.payload {
            Some(raw) => {
                let value: serde_json::Value =
                    serde_json::from_str(&raw).context("--payload is not valid JSON")?;
                if !value.is_object() {
                    anyhow::bail!("--payload must be a JSON object");
                }
                value
            }
            None => serde_json::Value::Null,
        };
        Ok(ChangeEvent::new(kind, subject, timestamp).with_payload(payload))
    }
}
