use serde::Serialize;
use std::fmt;

use super::stats::SessionStats;
use crate::tools::RecordedNote;

/// Lifecycle of a live session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session; `start` connects
    Disconnected,
    /// Waiting for the transport to open
    Connecting,
    /// Connected, microphone off; model audio still plays
    Idle,
    /// Connected, microphone streaming
    Capturing,
    /// Transport failed, or the microphone could not be acquired
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Idle => "idle",
            SessionState::Capturing => "capturing",
            SessionState::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the session published to observers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Option<String>,
    pub state: SessionState,
    /// Human-readable progress message
    pub status: String,
    /// Human-readable description of the last device or connection failure
    pub error: Option<String>,
    /// Notes recorded by the model, oldest first
    pub notes: Vec<RecordedNote>,
    /// Whether model audio is queued or playing
    pub playing: bool,
    pub stats: SessionStats,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            session_id: None,
            state: SessionState::Disconnected,
            status: "Ready to start".to_string(),
            error: None,
            notes: Vec::new(),
            playing: false,
            stats: SessionStats::default(),
        }
    }
}
