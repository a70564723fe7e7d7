//! HTTP API for controlling and observing the live session
//!
//! - GET /health - Health check
//! - GET /session - State, status, error, notes and stats
//! - GET /session/notes - Recorded notes
//! - GET /session/levels - Microphone and playback levels
//! - POST /session/start - Connect
//! - POST /session/capture/start - Start the microphone
//! - POST /session/capture/pause - Pause the microphone
//! - POST /session/reset - Reset and reconnect

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
