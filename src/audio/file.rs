use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::{AudioBackendConfig, AudioFrame, AudioInput};
use super::resample::{downmix_to_mono, resample_linear};
use crate::error::{VoiceError, VoiceResult};

/// A WAV file decoded to normalized samples
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved normalized samples
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()
                    .context("Failed to read audio samples")?
            }
        };

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Downmix and resample to mono at `target_rate`
    pub fn to_mono(&self, target_rate: u32) -> Vec<f32> {
        let mono = downmix_to_mono(&self.samples, self.channels);
        resample_linear(&mono, self.sample_rate, target_rate)
    }
}

/// Capture input that plays a WAV file as if it were a microphone
///
/// Frames are delivered at the cadence a live device would produce them.
/// Stopping mid-file releases the file; the next start begins from the top.
pub struct FileInput {
    path: PathBuf,
    config: AudioBackendConfig,
    capturing: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    name: String,
}

impl FileInput {
    pub fn new(path: impl Into<PathBuf>, config: AudioBackendConfig) -> Self {
        let path = path.into();
        let name = format!("file:{}", path.display());
        Self {
            path,
            config,
            capturing: Arc::new(AtomicBool::new(false)),
            task: None,
            name,
        }
    }
}

#[async_trait::async_trait]
impl AudioInput for FileInput {
    async fn start(&mut self) -> VoiceResult<mpsc::Receiver<AudioFrame>> {
        if self.capturing.load(Ordering::SeqCst) {
            return Err(VoiceError::CaptureUnavailable("Already capturing".to_string()));
        }

        let path = self.path.clone();
        let file = tokio::task::spawn_blocking(move || AudioFile::open(path))
            .await
            .map_err(|e| VoiceError::CaptureUnavailable(e.to_string()))?
            .map_err(|e| VoiceError::CaptureUnavailable(format!("{:#}", e)))?;

        let rate = self.config.capture_sample_rate;
        let frame_size = self.config.frame_size.max(1);
        let samples = file.to_mono(rate);
        let frame_period = Duration::from_secs_f64(frame_size as f64 / rate as f64);

        let (tx, rx) = mpsc::channel(64);
        let capturing = Arc::clone(&self.capturing);
        capturing.store(true, Ordering::SeqCst);

        info!(
            "File input started: {} ({} frames of {} samples)",
            self.path.display(),
            samples.len().div_ceil(frame_size),
            frame_size
        );

        self.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(frame_period);

            for chunk in samples.chunks(frame_size) {
                interval.tick().await;
                if !capturing.load(Ordering::SeqCst) {
                    break;
                }

                let mut frame = chunk.to_vec();
                frame.resize(frame_size, 0.0);

                if tx.send(AudioFrame::mono(frame, rate)).await.is_err() {
                    debug!("File input: receiver dropped");
                    break;
                }
            }

            capturing.store(false, Ordering::SeqCst);
            debug!("File input: end of file");
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> VoiceResult<()> {
        self.capturing.store(false, Ordering::SeqCst);

        if let Some(task) = self.task.take() {
            task.abort();
            info!("File input stopped: {}", self.path.display());
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for FileInput {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
