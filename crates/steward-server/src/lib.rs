pub mod error;
pub mod routes;
pub mod signature;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use std::path::PathBuf;
use tower_http::trace::TraceLayer;

/// Build the router with all routes and middleware.
pub fn build_router(root: PathBuf) -> Router {
    router_with_state(state::AppState::new(root))
}

pub fn router_with_state(app_state: state::AppState) -> Router {
    Router::new()
        .route("/webhook", post(routes::webhook::receive))
        .route("/api/trigger", post(routes::api::trigger))
        .route("/api/ledger", get(routes::api::ledger))
        .route("/api/health", get(routes::api::health))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Serve the webhook receiver until the process is stopped.
pub async fn serve(root: PathBuf, port: u16) -> anyhow::Result<()> {
    if let Ok(config) = steward_core::config::Config::load(&root) {
        if config.backend.queue_path().is_none() {
            tracing::warn!(
                "backend polls GitHub; queued deliveries are not read until backend.type is github_webhook"
            );
        }
    }
    let app_state = state::AppState::new(root);
    if app_state.secret.is_none() {
        tracing::warn!(
            "{} is not set; webhook signatures are not verified",
            state::SECRET_ENV
        );
    }
    let app = router_with_state(app_state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("steward webhook receiver listening on http://localhost:{port}");

    axum::serve(listener, app).await?;
    Ok(())
}
