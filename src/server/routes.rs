//! Router configuration for the HTTP API.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::AppState;

/// Create the router with every `/api` route.
pub fn create_router(state: AppState) -> Router {
    let upload_limit = state.service.config().max_upload_bytes;

    Router::new()
        // Intake; the body limit applies to uploads only
        .route(
            "/api/upload",
            post(handlers::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/process", post(handlers::process))
        // Retrieval
        .route("/api/result/:job_id", get(handlers::result))
        .route("/api/status/:job_id", get(handlers::status))
        .route("/api/download/:job_id/:filename", get(handlers::download))
        .route("/api/download-all/:job_id", get(handlers::download_all))
        // Prompt settings
        .route(
            "/api/config/prompt",
            get(handlers::get_prompt_config).post(handlers::save_prompt_config),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
