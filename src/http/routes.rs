use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Observable state
        .route("/session", get(handlers::get_session))
        .route("/session/notes", get(handlers::get_notes))
        .route("/session/levels", get(handlers::get_levels))
        // Session control
        .route("/session/start", post(handlers::start_session))
        .route("/session/capture/start", post(handlers::start_capture))
        .route("/session/capture/pause", post(handlers::pause_capture))
        .route("/session/reset", post(handlers::reset_session))
        // Browser dashboards poll from other origins
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
