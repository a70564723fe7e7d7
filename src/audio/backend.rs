use anyhow::Result;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::info;

use super::file::FileInput;
use super::mixer::VirtualOutput;
use crate::error::{VoiceError, VoiceResult};

/// Sample rate the live session expects for microphone audio
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Sample rate of model audio received from the live session
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Samples per capture frame (256 @ 16kHz ≈ 16ms)
pub const CAPTURE_FRAME_SIZE: usize = 256;

/// Mono audio, normalized to [-1, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Normalized samples
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels (always 1 for frames crossing the session)
    pub channels: u16,
}

impl AudioFrame {
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
        }
    }

    /// Playback duration in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Identifier of one scheduled buffer on an output device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

/// Configuration for audio devices
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Rate frames are delivered at by the input
    pub capture_sample_rate: u32,
    /// Rate of the output clock and mixer
    pub playback_sample_rate: u32,
    /// Samples per capture frame (affects latency)
    pub frame_size: usize,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            frame_size: CAPTURE_FRAME_SIZE,
        }
    }
}

/// Audio capture device
///
/// Implementations:
/// - `FileInput`: streams a WAV file at real-time cadence
/// - `CpalInput`: default microphone (`device-audio` feature)
#[async_trait::async_trait]
pub trait AudioInput: Send + Sync {
    /// Acquire the device and start delivering frames
    ///
    /// This is the only operation that may wait on the user or the OS
    /// (permission prompts). Denial is reported as `CaptureUnavailable`.
    async fn start(&mut self) -> VoiceResult<mpsc::Receiver<AudioFrame>>;

    /// Release the device; no frames are delivered afterwards
    async fn stop(&mut self) -> VoiceResult<()>;

    /// Check if the device is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get device name for logging
    fn name(&self) -> &str;

    /// Failure that ended the frame stream, if the device broke mid-capture
    ///
    /// Inputs that only end cleanly (end of file) keep the default.
    fn take_error(&mut self) -> Option<VoiceError> {
        None
    }
}

/// Audio output device with its own playback clock
///
/// Implementations:
/// - `VirtualOutput`: software clock, manual or ticker-driven
/// - `CpalOutput`: default speaker (`device-audio` feature)
pub trait AudioOutput: Send {
    /// Get device name for logging
    fn name(&self) -> &str;

    /// Rate of the device clock
    fn sample_rate(&self) -> u32;

    /// Current playback time in seconds on the device clock
    fn current_time(&self) -> f64;

    /// Schedule a buffer to start at `start_at` seconds on the device clock
    ///
    /// Returns the time the buffer actually starts. This is later than
    /// `start_at` when the clock has already passed it.
    fn schedule(&mut self, id: HandleId, frame: &AudioFrame, start_at: f64) -> VoiceResult<f64>;

    /// Stop a buffer immediately, whether or not it started
    fn stop(&mut self, id: HandleId);

    /// Take the receiver of naturally-completed buffer ids
    ///
    /// Returns `None` if already taken.
    fn take_completions(&mut self) -> Option<mpsc::UnboundedReceiver<HandleId>>;
}

/// Audio input source type
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSource {
    /// Default microphone (`device-audio` feature)
    Microphone,
    /// WAV file input (for testing/headless runs)
    File(PathBuf),
}

/// Audio output sink type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSink {
    /// Default speaker (`device-audio` feature)
    Device,
    /// Software clock, audio is rendered and discarded
    Virtual,
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create audio input based on platform and configuration
    pub fn create_input(
        source: AudioSource,
        config: &AudioBackendConfig,
    ) -> Result<Box<dyn AudioInput>> {
        match source {
            AudioSource::Microphone => {
                #[cfg(feature = "device-audio")]
                {
                    use super::device::CpalInput;
                    Ok(Box::new(CpalInput::new(config.clone())))
                }

                #[cfg(not(feature = "device-audio"))]
                {
                    let _ = config;
                    anyhow::bail!(
                        "Microphone capture requires the `device-audio` feature; use a file input instead"
                    )
                }
            }

            AudioSource::File(path) => {
                info!("Using file input: {}", path.display());
                Ok(Box::new(FileInput::new(path, config.clone())))
            }
        }
    }

    /// Create audio output based on platform and configuration
    pub fn create_output(
        sink: AudioSink,
        config: &AudioBackendConfig,
    ) -> Result<Box<dyn AudioOutput>> {
        match sink {
            AudioSink::Device => {
                #[cfg(feature = "device-audio")]
                {
                    use super::device::CpalOutput;
                    Ok(Box::new(CpalOutput::open(config.clone())?))
                }

                #[cfg(not(feature = "device-audio"))]
                {
                    let _ = config;
                    anyhow::bail!("Speaker output requires the `device-audio` feature")
                }
            }

            AudioSink::Virtual => {
                info!("Using virtual output at {}Hz", config.playback_sample_rate);
                let output = VirtualOutput::new(config.playback_sample_rate).with_realtime_clock();
                Ok(Box::new(output))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::mono(vec![0.0; 2400], 24000);
        assert!((frame.duration_secs() - 0.1).abs() < 1e-9);

        let frame = AudioFrame::mono(vec![0.0; CAPTURE_FRAME_SIZE], CAPTURE_SAMPLE_RATE);
        assert!((frame.duration_secs() - 0.016).abs() < 1e-9);
    }

    #[test]
    fn test_frame_duration_zero_rate() {
        let frame = AudioFrame::mono(vec![0.0; 10], 0);
        assert_eq!(frame.duration_secs(), 0.0);
    }

    #[test]
    fn test_backend_config_default() {
        let config = AudioBackendConfig::default();
        assert_eq!(config.capture_sample_rate, 16000);
        assert_eq!(config.playback_sample_rate, 24000);
        assert_eq!(config.frame_size, 256);
    }

    #[cfg(not(feature = "device-audio"))]
    #[test]
    fn test_microphone_requires_feature() {
        let result =
            AudioBackendFactory::create_input(AudioSource::Microphone, &AudioBackendConfig::default());
        assert!(result.is_err());
    }
}
