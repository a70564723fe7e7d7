//! Live session management
//!
//! This module provides the `SessionController` that coordinates:
//! - Connection lifecycle (connect, open, close, error, reset)
//! - Microphone capture toward the transport
//! - Gapless playback of model audio and barge-in
//! - Tool calls and the notes they record
//! - The observable snapshot and audio taps

mod config;
mod controller;
mod handle;
mod state;
mod stats;

pub use config::{ResponseModality, SessionConfig, DEFAULT_MODEL, DEFAULT_VOICE};
pub use controller::{SessionController, SessionParts};
pub use handle::SessionHandle;
pub use state::{SessionSnapshot, SessionState};
pub use stats::{SessionCounters, SessionStats};
