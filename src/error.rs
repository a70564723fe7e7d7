//! Error taxonomy for the live voice engine
//!
//! Per-chunk failures (`MalformedAudioData`) are swallowed by their callers to
//! keep the stream going. Device and connection failures are surfaced on the
//! session's observable `error` state. Tool failures never leave the dispatcher;
//! they are turned into structured results for the remote model.

use thiserror::Error;

/// Result type for voice engine operations
pub type VoiceResult<T> = Result<T, VoiceError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VoiceError {
    /// Input device could not be opened (permission denied, no hardware, bad file)
    #[error("Capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// An audio chunk could not be decoded
    #[error("Malformed audio data: {0}")]
    MalformedAudioData(String),

    /// Connection-level failure of the live session
    #[error("Transport error: {0}")]
    Transport(String),

    /// The model asked for an action nobody registered
    #[error("Unsupported tool action: {0}")]
    UnsupportedToolAction(String),

    /// A registered action was called with missing or mistyped arguments
    #[error("Invalid arguments for '{action}': {reason}")]
    InvalidToolArguments { action: String, reason: String },

    /// Output device failure
    #[error("Playback error: {0}")]
    Playback(String),

    /// The session controller task is gone
    #[error("Session controller has stopped")]
    ControllerStopped,
}
