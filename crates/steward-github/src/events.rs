//! Polling event source over `GET /repos/{repo}/issues?since=`.
//!
//! The API filters on `updated_at >= since`, so the last timestamp handed
//! out comes back on the next poll. The cursor records which subjects were
//! already emitted at that timestamp: `<rfc3339>|<subject>,<subject>`.

use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use steward_core::event::{ChangeEvent, Cursor};
use steward_core::remote::{subject_id, SubjectType};
use steward_core::source::EventSource;
use steward_core::types::EventKind;
use steward_core::StewardError;
use tracing::debug;

use crate::client::GitHubClient;
use crate::wire::Issue;

pub fn encode_cursor(at: DateTime<Utc>, seen: &BTreeSet<String>) -> Cursor {
    let seen: Vec<&str> = seen.iter().map(String::as_str).collect();
    Cursor(format!(
        "{}|{}",
        at.to_rfc3339_opts(SecondsFormat::Secs, true),
        seen.join(",")
    ))
}

/// `None` for the start cursor.
pub fn decode_cursor(
    cursor: &Cursor,
) -> steward_core::Result<Option<(DateTime<Utc>, BTreeSet<String>)>> {
    if cursor.is_start() {
        return Ok(None);
    }
    let foreign = || {
        StewardError::InvalidConfig(format!(
            "cursor '{cursor}' was not produced by the GitHub event source"
        ))
    };
    let (at, seen) = cursor.as_str().split_once('|').ok_or_else(foreign)?;
    let at = DateTime::parse_from_rfc3339(at)
        .map_err(|_| foreign())?
        .with_timezone(&Utc);
    let seen = seen
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    Ok(Some((at, seen)))
}

fn to_event(issue: &Issue) -> ChangeEvent {
    let ty = if issue.is_pull_request() {
        SubjectType::PullRequest
    } else {
        SubjectType::Issue
    };
    let kind = if issue.state == "closed" {
        EventKind::ClosedItem
    } else if issue.created_at == issue.updated_at {
        EventKind::NewItem
    } else {
        EventKind::UpdatedItem
    };
    let mut payload = json!({ "title": issue.title });
    if let Some(user) = &issue.user {
        payload["author"] = json!(user.login);
    }
    ChangeEvent::new(kind, subject_id(ty, issue.number), issue.updated_at.timestamp())
        .with_payload(payload)
}

impl EventSource for GitHubClient {
    async fn fetch_since(&self, cursor: &Cursor) -> steward_core::Result<(Vec<ChangeEvent>, Cursor)> {
        let position = decode_cursor(cursor)?;

        let since = position
            .as_ref()
            .map(|(at, _)| at.to_rfc3339_opts(SecondsFormat::Secs, true));
        let mut query = vec![("state", "all"), ("sort", "updated"), ("direction", "asc")];
        if let Some(since) = &since {
            query.push(("since", since.as_str()));
        }
        let issues: Vec<Issue> = self
            .paged("list updated issues", "issues", &query)
            .await
            .map_err(|e| e.into_source())?;

        let (mut last_at, mut seen) = match position {
            Some((at, seen)) => (Some(at), seen),
            None => (None, BTreeSet::new()),
        };
        let mut events = Vec::with_capacity(issues.len());
        for issue in &issues {
            let event = to_event(issue);
            if Some(issue.updated_at) == last_at {
                if !seen.insert(event.subject.clone()) {
                    continue;
                }
            } else {
                last_at = Some(issue.updated_at);
                seen = BTreeSet::from([event.subject.clone()]);
            }
            events.push(event);
        }

        debug!(
            repo = self.repo(),
            fetched = issues.len(),
            emitted = events.len(),
            "polled issues"
        );
        let next = match last_at {
            Some(at) => encode_cursor(at, &seen),
            None => cursor.clone(),
        };
        Ok((events, next))
    }
}
