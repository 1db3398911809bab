use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use steward_core::event::{ChangeEvent, Cursor};
use steward_core::ledger::Ledger;
use steward_core::types::EventKind;

use crate::error::AppError;
use crate::routes::enqueue;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TriggerBody {
    subject: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    timestamp: Option<i64>,
}

/// POST /api/trigger — enqueue an external-trigger event.
pub async fn trigger(
    State(app): State<AppState>,
    Json(body): Json<TriggerBody>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let subject = body.subject.trim();
    if subject.is_empty() {
        return Err(AppError::bad_request("subject must not be empty"));
    }
    let timestamp = body
        .timestamp
        .unwrap_or_else(|| chrono::Utc::now().timestamp());
    let event =
        ChangeEvent::new(EventKind::ExternalTrigger, subject, timestamp).with_payload(body.payload);
    let id = enqueue(&app, event).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "queued": id }))))
}

/// GET /api/ledger — every ledger entry, newest first. Never creates the
/// ledger; before the first run the list is empty.
pub async fn ledger(State(app): State<AppState>) -> Result<Json<Value>, AppError> {
    let path = app.ledger_path.clone();
    let result = tokio::task::spawn_blocking(move || {
        let Some(ledger) = Ledger::open_existing(&path)? else {
            return Ok(json!({ "cursor": Cursor::start(), "entries": [] }));
        };
        let entries = ledger.list()?;
        Ok::<_, steward_core::StewardError>(json!({
            "cursor": ledger.cursor()?,
            "entries": entries,
        }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(result))
}

/// GET /api/health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
