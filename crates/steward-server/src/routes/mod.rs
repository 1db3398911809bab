pub mod api;
pub mod webhook;

use steward_core::event::ChangeEvent;

use crate::error::AppError;
use crate::state::AppState;

/// Append `event` to the queue file consumed by the driver.
pub(crate) async fn enqueue(app: &AppState, event: ChangeEvent) -> Result<String, AppError> {
    let id = event.id().to_string();
    let _guard = app.queue_lock.lock().await;
    let path = app.queue_path.clone();
    tokio::task::spawn_blocking(move || steward_core::source::append_event(&path, &event))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    tracing::info!(event = %id, "event queued");
    Ok(id)
}
