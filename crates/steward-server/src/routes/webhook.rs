use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use steward_core::event::ChangeEvent;
use steward_core::remote::{subject_id, SubjectType};
use steward_core::types::EventKind;
use tracing::debug;

use crate::error::AppError;
use crate::routes::enqueue;
use crate::signature;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct Delivery {
    action: String,
    issue: Option<Item>,
    pull_request: Option<Item>,
    sender: Option<Sender>,
    label: Option<LabelRef>,
}

#[derive(Debug, Deserialize)]
struct Item {
    number: u64,
    #[serde(default)]
    title: String,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Sender {
    login: String,
}

#[derive(Debug, Deserialize)]
struct LabelRef {
    name: String,
}

fn kind_for(action: &str) -> EventKind {
    match action {
        "opened" | "reopened" => EventKind::NewItem,
        "closed" => EventKind::ClosedItem,
        _ => EventKind::UpdatedItem,
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Normalize an `issues` or `pull_request` delivery.
fn to_event(event_name: &str, delivery: Delivery, delivery_id: Option<&str>) -> Result<ChangeEvent, AppError> {
    let (ty, item) = match (event_name, delivery.issue, delivery.pull_request) {
        ("pull_request", _, Some(pr)) => (SubjectType::PullRequest, pr),
        ("issues", Some(issue), _) => (SubjectType::Issue, issue),
        _ => return Err(AppError::bad_request(format!("{event_name} delivery has no item"))),
    };
    let timestamp = item.updated_at.unwrap_or_else(Utc::now).timestamp();

    let mut payload = json!({ "action": delivery.action, "title": item.title });
    if let Some(sender) = delivery.sender {
        payload["author"] = json!(sender.login);
    }
    if let Some(label) = delivery.label {
        payload["label"] = json!(label.name);
    }
    if let Some(id) = delivery_id {
        payload["delivery"] = json!(id);
    }
    Ok(ChangeEvent::new(kind_for(&delivery.action), subject_id(ty, item.number), timestamp)
        .with_payload(payload))
}

/// POST /webhook — GitHub deliveries.
pub async fn receive(
    State(app): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let event_name = header(&headers, "x-github-event")
        .ok_or_else(|| AppError::bad_request("missing X-GitHub-Event header"))?
        .to_string();

    if let Some(secret) = &app.secret {
        signature::verify(secret, &body, header(&headers, "x-hub-signature-256"))?;
    }

    match event_name.as_str() {
        "ping" => Ok((StatusCode::OK, Json(json!({ "status": "pong" })))),
        "issues" | "pull_request" => {
            let delivery: Delivery = serde_json::from_slice(&body)
                .map_err(|e| AppError::bad_request(format!("invalid {event_name} payload: {e}")))?;
            let event = to_event(&event_name, delivery, header(&headers, "x-github-delivery"))?;
            let id = enqueue(&app, event).await?;
            Ok((StatusCode::ACCEPTED, Json(json!({ "queued": id }))))
        }
        other => {
            debug!(event = other, "ignoring delivery");
            Ok((StatusCode::ACCEPTED, Json(json!({ "ignored": other }))))
        }
    }
}
