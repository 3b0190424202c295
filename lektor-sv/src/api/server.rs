//! HTTP server setup and routing

use axum::{
    routing::{delete, get, post},
    Router,
};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;

use lektor_common::config::RootLayout;
use lektor_common::events::LektorEvent;
use lektor_common::store::JobStore;

/// Shared application context passed to all handlers
///
/// AppContext implements Clone, which gives us `FromRef<AppContext>` for free
/// via Axum's blanket implementation.
#[derive(Clone)]
pub struct AppContext {
    pub store: JobStore,
    pub layout: std::sync::Arc<RootLayout>,
    pub events: broadcast::Sender<LektorEvent>,
}

/// Build the application router with all routes.
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        // Health endpoint
        .route("/health", get(super::handlers::health))
        // Job submission and snapshots
        .route("/api/jobs", post(super::handlers::create_job))
        .route("/api/jobs", get(super::handlers::list_jobs))
        .route("/api/jobs/:job_id", get(super::handlers::get_job))
        // Job control
        .route("/api/jobs/:job_id/pause", post(super::handlers::pause_job))
        .route("/api/jobs/:job_id/resume", post(super::handlers::resume_job))
        .route("/api/jobs/:job_id/cancel", post(super::handlers::cancel_job))
        .route("/api/jobs/:job_id", delete(super::handlers::delete_job))
        // Settings (pipeline parameters + worker pool size)
        .route("/api/settings", get(super::handlers::get_settings))
        .route("/api/settings", post(super::handlers::update_settings))
        // Lexicon
        .route("/api/lexicon", get(super::handlers::get_lexicon))
        .route("/api/lexicon", post(super::handlers::add_lexicon_word))
        .route(
            "/api/lexicon/:word",
            delete(super::handlers::delete_lexicon_word),
        )
        // SSE event stream
        .route("/events", get(super::sse::event_stream))
        // Attach application context
        .with_state(ctx)
        // Enable CORS for local UI access
        .layer(CorsLayer::permissive())
}
