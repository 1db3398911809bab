use axum::http::StatusCode;
use http_body_util::BodyExt;
use steward_core::event::ChangeEvent;
use steward_core::ledger::{Ledger, LedgerEntry, Outcome};
use steward_core::action::Action;
use steward_core::types::{ActionKind, EventKind};
use steward_server::signature::sign;
use steward_server::state::AppState;
use tempfile::TempDir;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn app(dir: &TempDir, secret: Option<&str>) -> axum::Router {
    let state = AppState::new(dir.path().to_path_buf()).with_secret(secret.map(String::from));
    steward_server::router_with_state(state)
}

fn queued(dir: &TempDir) -> Vec<ChangeEvent> {
    let path = dir.path().join(".steward/queue.jsonl");
    match std::fs::read_to_string(path) {
        Ok(data) => data
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect(),
        Err(_) => Vec::new(),
    }
}

async fn send(
    app: axum::Router,
    req: axum::http::Request<axum::body::Body>,
) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn delivery(event: &str, body: &serde_json::Value, signature: Option<String>) -> axum::http::Request<axum::body::Body> {
    let bytes = serde_json::to_vec(body).unwrap();
    let mut req = axum::http::Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .header("x-github-event", event)
        .header("x-github-delivery", "72d3162e");
    if let Some(sig) = signature {
        req = req.header("x-hub-signature-256", sig);
    }
    req.body(axum::body::Body::from(bytes)).unwrap()
}

fn opened_issue() -> serde_json::Value {
    serde_json::json!({
        "action": "opened",
        "issue": { "number": 12, "title": "Please add me", "updated_at": "2024-05-01T10:00:00Z" },
        "sender": { "login": "ada" }
    })
}

// ---------------------------------------------------------------------------
// Webhook
// ---------------------------------------------------------------------------

#[tokio::test]
async fn issue_delivery_is_queued() {
    let dir = TempDir::new().unwrap();
    let (status, json) = send(app(&dir, None), delivery("issues", &opened_issue(), None)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["queued"], "new-item:ISSUE-12@1714557600");

    let events = queued(&dir);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::NewItem);
    assert_eq!(events[0].payload_field("author").as_deref(), Some("ada"));
    assert_eq!(events[0].payload_field("delivery").as_deref(), Some("72d3162e"));
}

#[tokio::test]
async fn delivery_lands_in_webhook_backend_queue() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join(".steward")).unwrap();
    std::fs::write(
        dir.path().join(".steward/config.yaml"),
        "backend:\n  type: github_webhook\n  repo: acme/widgets\n  queue_path: .steward/deliveries.jsonl\n",
    )
    .unwrap();

    let (status, _) = send(app(&dir, None), delivery("issues", &opened_issue(), None)).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let queued = std::fs::read_to_string(dir.path().join(".steward/deliveries.jsonl")).unwrap();
    let event: ChangeEvent = serde_json::from_str(queued.lines().next().unwrap()).unwrap();
    assert_eq!(event.subject, "ISSUE-12");
    assert!(!dir.path().join(".steward/queue.jsonl").exists());
}

#[tokio::test]
async fn signed_delivery_is_accepted() {
    let dir = TempDir::new().unwrap();
    let body = opened_issue();
    let sig = sign(b"hush", &serde_json::to_vec(&body).unwrap());
    let (status, _) = send(app(&dir, Some("hush")), delivery("issues", &body, Some(sig))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(queued(&dir).len(), 1);
}

#[tokio::test]
async fn bad_or_missing_signature_is_401() {
    let dir = TempDir::new().unwrap();
    let body = opened_issue();

    let (status, _) = send(app(&dir, Some("hush")), delivery("issues", &body, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = sign(b"wrong", &serde_json::to_vec(&body).unwrap());
    let (status, json) =
        send(app(&dir, Some("hush")), delivery("issues", &body, Some(forged))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(json["error"].as_str().unwrap().contains("does not match"));
    assert!(queued(&dir).is_empty());
}

#[tokio::test]
async fn ping_and_unrelated_events_are_not_queued() {
    let dir = TempDir::new().unwrap();
    let (status, json) =
        send(app(&dir, None), delivery("ping", &serde_json::json!({"zen": "hi"}), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "pong");

    let (status, json) =
        send(app(&dir, None), delivery("push", &serde_json::json!({"ref": "x"}), None)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["ignored"], "push");
    assert!(queued(&dir).is_empty());
}

#[tokio::test]
async fn missing_event_header_is_400() {
    let dir = TempDir::new().unwrap();
    let req = axum::http::Request::builder()
        .method("POST")
        .uri("/webhook")
        .body(axum::body::Body::from("{}"))
        .unwrap();
    let (status, _) = send(app(&dir, None), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// API
// ---------------------------------------------------------------------------

#[tokio::test]
async fn trigger_enqueues_external_event() {
    let dir = TempDir::new().unwrap();
    let req = axum::http::Request::builder()
        .method("POST")
        .uri("/api/trigger")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(
            serde_json::to_vec(&serde_json::json!({
                "subject": "branch/main",
                "payload": { "alias": "ada" },
                "timestamp": 500
            }))
            .unwrap(),
        ))
        .unwrap();
    let (status, json) = send(app(&dir, None), req).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["queued"], "external-trigger:branch/main@500");

    let events = queued(&dir);
    assert_eq!(events[0].payload_field("alias").as_deref(), Some("ada"));
}

#[tokio::test]
async fn trigger_rejects_empty_subject() {
    let dir = TempDir::new().unwrap();
    let req = axum::http::Request::builder()
        .method("POST")
        .uri("/api/trigger")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(r#"{"subject": "  "}"#))
        .unwrap();
    let (status, _) = send(app(&dir, None), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ledger_lists_entries() {
    let dir = TempDir::new().unwrap();
    {
        let ledger = Ledger::open(&dir.path().join(".steward/ledger.redb")).unwrap();
        let event = ChangeEvent::new(EventKind::UpdatedItem, "PR-42", 100);
        let action = Action::new(event.id(), ActionKind::Merge, "PR-42", Default::default());
        ledger
            .record(&LedgerEntry::for_action(&action, Outcome::Applied))
            .unwrap();
    }

    let req = axum::http::Request::builder()
        .uri("/api/ledger")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, json) = send(app(&dir, None), req).await;
    assert_eq!(status, StatusCode::OK);
    let entries = json["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["target"], "PR-42");
}

#[tokio::test]
async fn ledger_before_first_run_is_empty_and_not_created() {
    let dir = TempDir::new().unwrap();
    let req = axum::http::Request::builder()
        .uri("/api/ledger")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, json) = send(app(&dir, None), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["cursor"], "");
    assert!(json["entries"].as_array().unwrap().is_empty());
    assert!(!dir.path().join(".steward/ledger.redb").exists());
    assert!(!dir.path().join(".steward").exists());
}

#[tokio::test]
async fn health_is_ok() {
    let dir = TempDir::new().unwrap();
    let req = axum::http::Request::builder()
        .uri("/api/health")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, json) = send(app(&dir, None), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}
