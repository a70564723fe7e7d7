pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod session;
pub mod tools;
pub mod transport;

pub use audio::{
    AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFrame, AudioInput, AudioLevels,
    AudioOutput, AudioSink, AudioSource, FileInput, LevelMeter, PlaybackScheduler, TransportBlob,
    VirtualOutput,
};
pub use config::Config;
pub use error::{VoiceError, VoiceResult};
pub use http::{create_router, AppState};
pub use session::{
    SessionConfig, SessionController, SessionHandle, SessionParts, SessionSnapshot, SessionState,
    SessionStats,
};
pub use tools::{NoteBook, RecordNoteTool, RecordedNote, ToolRegistry};
pub use transport::{GeminiTransport, MemoryTransport, Transport};
