use super::state::AppState;
use crate::error::VoiceError;
use crate::session::SessionState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use tracing::{error, info};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub accepted: bool,
    /// State when the command was queued
    pub state: SessionState,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn queued(state: &AppState, result: Result<(), VoiceError>, what: &str) -> axum::response::Response {
    match result {
        Ok(()) => {
            info!("HTTP: {} requested", what);
            (
                StatusCode::ACCEPTED,
                Json(CommandResponse {
                    accepted: true,
                    state: state.session.state(),
                    message: format!("{} requested", what),
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("HTTP: {} failed: {}", what, e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /session
/// Full observable session state
pub async fn get_session(State(state): State<AppState>) -> impl IntoResponse {
    let mut snapshot = state.session.snapshot();
    snapshot.stats = state.session.stats();
    (StatusCode::OK, Json(snapshot))
}

/// GET /session/notes
/// Notes recorded so far, oldest first
pub async fn get_notes(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.session.snapshot().notes))
}

/// GET /session/levels
/// Current microphone and playback levels
pub async fn get_levels(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.meter.levels()))
}

/// POST /session/start
pub async fn start_session(State(state): State<AppState>) -> impl IntoResponse {
    let result = state.session.start();
    queued(&state, result, "Session start")
}

/// POST /session/capture/start
pub async fn start_capture(State(state): State<AppState>) -> impl IntoResponse {
    let result = state.session.start_capture();
    queued(&state, result, "Capture start")
}

/// POST /session/capture/pause
pub async fn pause_capture(State(state): State<AppState>) -> impl IntoResponse {
    let result = state.session.pause_capture();
    queued(&state, result, "Capture pause")
}

/// POST /session/reset
pub async fn reset_session(State(state): State<AppState>) -> impl IntoResponse {
    let result = state.session.reset();
    queued(&state, result, "Session reset")
}

/// GET /health
/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.session.is_running() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "session controller stopped")
    }
}
