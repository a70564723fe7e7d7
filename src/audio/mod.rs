pub mod backend;
pub mod capture;
pub mod codec;
pub mod file;
pub mod meter;
pub mod mixer;
pub mod playback;
pub mod resample;

#[cfg(feature = "device-audio")]
pub mod device;

pub use backend::{
    AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioInput, AudioOutput, AudioSink,
    AudioSource, HandleId, CAPTURE_FRAME_SIZE, CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE,
};
pub use capture::{CaptureEvent, CaptureOutcome, CaptureProgress, CapturePipeline};
pub use codec::{decode, encode, TransportBlob};
pub use file::{AudioFile, FileInput};
pub use meter::{AudioLevels, LevelMeter};
pub use mixer::{PlaybackMixer, VirtualClock, VirtualOutput};
pub use playback::{PlaybackHandle, PlaybackScheduler};
