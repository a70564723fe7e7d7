//! Microphone and speaker I/O through cpal (`device-audio` feature)
//!
//! cpal streams are not `Send`, so each stream lives on a dedicated thread
//! that owns it until told to stop. The input thread forwards fixed-size
//! frames over a channel; the output thread renders the shared mixer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use super::backend::{AudioBackendConfig, AudioFrame, AudioInput, AudioOutput, HandleId};
use super::mixer::{lock_mixer, PlaybackMixer, SharedMixer};
use super::resample::{downmix_to_mono, resample_linear};
use crate::error::{VoiceError, VoiceResult};

struct StreamThread {
    stop_tx: std_mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl StreamThread {
    fn shutdown(self) {
        let _ = self.stop_tx.send(());
        if self.handle.join().is_err() {
            error!("Audio stream thread panicked");
        }
    }
}

/// State shared between `CpalInput` and its stream callbacks
#[derive(Clone, Default)]
struct InputSignals {
    capturing: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    /// Stream error that ended capture
    failure: Arc<Mutex<Option<String>>>,
}

/// Default microphone
pub struct CpalInput {
    config: AudioBackendConfig,
    signals: InputSignals,
    thread: Option<StreamThread>,
}

impl CpalInput {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            signals: InputSignals::default(),
            thread: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioInput for CpalInput {
    async fn start(&mut self) -> VoiceResult<mpsc::Receiver<AudioFrame>> {
        if self.thread.is_some() {
            return Err(VoiceError::CaptureUnavailable("Already capturing".to_string()));
        }

        let (frame_tx, frame_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();

        let config = self.config.clone();
        let signals = self.signals.clone();
        let error_stop_tx = stop_tx.clone();
        lock_failure(&self.signals.failure).take();

        let handle = std::thread::Builder::new()
            .name("live-voice-capture".to_string())
            .spawn(move || {
                let stream = match build_input_stream(config, frame_tx, signals, error_stop_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(VoiceError::CaptureUnavailable(e.to_string())));
                    return;
                }

                let _ = ready_tx.send(Ok(()));
                // Hold the stream until stopped, failed, or the owner goes away.
                // Dropping it closes the frame channel.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| VoiceError::CaptureUnavailable(e.to_string()))?;

        let thread = StreamThread { stop_tx, handle };

        match ready_rx.await {
            Ok(Ok(())) => {
                self.signals.capturing.store(true, Ordering::SeqCst);
                self.thread = Some(thread);
                info!("Microphone capture started");
                Ok(frame_rx)
            }
            Ok(Err(e)) => {
                thread.shutdown();
                Err(e)
            }
            Err(_) => {
                thread.shutdown();
                Err(VoiceError::CaptureUnavailable(
                    "Capture thread exited before the device opened".to_string(),
                ))
            }
        }
    }

    async fn stop(&mut self) -> VoiceResult<()> {
        self.signals.capturing.store(false, Ordering::SeqCst);

        if let Some(thread) = self.thread.take() {
            tokio::task::spawn_blocking(move || thread.shutdown())
                .await
                .map_err(|e| VoiceError::CaptureUnavailable(e.to_string()))?;

            let dropped = self.signals.dropped.swap(0, Ordering::SeqCst);
            info!("Microphone capture stopped ({} frames dropped)", dropped);
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.signals.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }

    fn take_error(&mut self) -> Option<VoiceError> {
        lock_failure(&self.signals.failure)
            .take()
            .map(VoiceError::CaptureUnavailable)
    }
}

fn lock_failure(failure: &Mutex<Option<String>>) -> MutexGuard<'_, Option<String>> {
    failure.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.stop_tx.send(());
        }
    }
}

fn build_input_stream(
    config: AudioBackendConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
    signals: InputSignals,
    stop_tx: std_mpsc::Sender<()>,
) -> VoiceResult<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| VoiceError::CaptureUnavailable("No audio input device found".to_string()))?;

    info!("Using audio input device: {:?}", device.name());

    let supported = device
        .default_input_config()
        .map_err(|e| VoiceError::CaptureUnavailable(e.to_string()))?;

    info!(
        "Input config: {} Hz, {} channels, {:?}",
        supported.sample_rate().0,
        supported.channels(),
        supported.sample_format()
    );

    let sample_format = supported.sample_format();
    let stream_config: StreamConfig = supported.into();

    match sample_format {
        SampleFormat::I16 => {
            input_stream_typed::<i16>(&device, &stream_config, config, frame_tx, signals, stop_tx)
        }
        SampleFormat::U16 => {
            input_stream_typed::<u16>(&device, &stream_config, config, frame_tx, signals, stop_tx)
        }
        SampleFormat::F32 => {
            input_stream_typed::<f32>(&device, &stream_config, config, frame_tx, signals, stop_tx)
        }
        other => Err(VoiceError::CaptureUnavailable(format!(
            "Unsupported input sample format {:?}",
            other
        ))),
    }
}

fn input_stream_typed<T>(
    device: &cpal::Device,
    stream_config: &StreamConfig,
    config: AudioBackendConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
    signals: InputSignals,
    stop_tx: std_mpsc::Sender<()>,
) -> VoiceResult<cpal::Stream>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let device_rate = stream_config.sample_rate.0;
    let channels = stream_config.channels;
    let target_rate = config.capture_sample_rate;
    let frame_size = config.frame_size.max(1);
    let mut pending: Vec<f32> = Vec::with_capacity(frame_size * 2);
    let InputSignals {
        capturing,
        dropped,
        failure,
    } = signals;
    let error_capturing = Arc::clone(&capturing);

    device
        .build_input_stream(
            stream_config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !capturing.load(Ordering::SeqCst) {
                    return;
                }

                let normalized: Vec<f32> = data.iter().map(|&s| f32::from_sample(s)).collect();
                let mono = downmix_to_mono(&normalized, channels);
                pending.extend(resample_linear(&mono, device_rate, target_rate));

                while pending.len() >= frame_size {
                    let frame: Vec<f32> = pending.drain(..frame_size).collect();
                    if frame_tx.try_send(AudioFrame::mono(frame, target_rate)).is_err() {
                        dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            },
            move |err| {
                error!("Audio input stream error: {}", err);
                error_capturing.store(false, Ordering::SeqCst);
                lock_failure(&failure).get_or_insert_with(|| err.to_string());
                let _ = stop_tx.send(());
            },
            None,
        )
        .map_err(|e| VoiceError::CaptureUnavailable(e.to_string()))
}

/// Default speaker, rendering the shared playback mixer
pub struct CpalOutput {
    mixer: SharedMixer,
    completions: Option<mpsc::UnboundedReceiver<HandleId>>,
    sample_rate: u32,
    thread: Option<StreamThread>,
}

impl CpalOutput {
    /// Open the default output device and start rendering
    pub fn open(config: AudioBackendConfig) -> VoiceResult<Self> {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let requested_rate = config.playback_sample_rate;

        let handle = std::thread::Builder::new()
            .name("live-voice-playback".to_string())
            .spawn(move || {
                let opened = build_output_stream(requested_rate, completion_tx).and_then(
                    |(stream, mixer, rate)| {
                        stream
                            .play()
                            .map_err(|e| VoiceError::Playback(e.to_string()))?;
                        Ok((stream, mixer, rate))
                    },
                );

                match opened {
                    Ok((stream, mixer, rate)) => {
                        let _ = ready_tx.send(Ok((mixer, rate)));
                        let _ = stop_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| VoiceError::Playback(e.to_string()))?;

        let thread = StreamThread { stop_tx, handle };

        match ready_rx.recv() {
            Ok(Ok((mixer, sample_rate))) => {
                info!("Speaker output started at {}Hz", sample_rate);
                Ok(Self {
                    mixer,
                    completions: Some(completion_rx),
                    sample_rate,
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => {
                thread.shutdown();
                Err(e)
            }
            Err(_) => {
                thread.shutdown();
                Err(VoiceError::Playback(
                    "Playback thread exited before the device opened".to_string(),
                ))
            }
        }
    }
}

fn build_output_stream(
    requested_rate: u32,
    completion_tx: mpsc::UnboundedSender<HandleId>,
) -> VoiceResult<(cpal::Stream, SharedMixer, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| VoiceError::Playback("No audio output device found".to_string()))?;

    info!("Using audio output device: {:?}", device.name());

    let supported = device
        .default_output_config()
        .map_err(|e| VoiceError::Playback(e.to_string()))?;

    let sample_format = supported.sample_format();
    let stream_config: StreamConfig = supported.into();
    let device_rate = stream_config.sample_rate.0;

    if device_rate != requested_rate {
        debug!(
            "Output device runs at {}Hz, model audio will be resampled from {}Hz",
            device_rate, requested_rate
        );
    }

    let mixer: SharedMixer = Arc::new(Mutex::new(PlaybackMixer::new(device_rate, completion_tx)));

    let stream = match sample_format {
        SampleFormat::I16 => output_stream_typed::<i16>(&device, &stream_config, Arc::clone(&mixer)),
        SampleFormat::U16 => output_stream_typed::<u16>(&device, &stream_config, Arc::clone(&mixer)),
        SampleFormat::F32 => output_stream_typed::<f32>(&device, &stream_config, Arc::clone(&mixer)),
        other => Err(VoiceError::Playback(format!(
            "Unsupported output sample format {:?}",
            other
        ))),
    }?;

    Ok((stream, mixer, device_rate))
}

fn output_stream_typed<T>(
    device: &cpal::Device,
    stream_config: &StreamConfig,
    mixer: SharedMixer,
) -> VoiceResult<cpal::Stream>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let channels = stream_config.channels.max(1) as usize;
    let mut mono: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            stream_config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                mono.resize(frames, 0.0);
                lock_mixer(&mixer).render(&mut mono);

                for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                    for out in frame.iter_mut() {
                        *out = T::from_sample(sample);
                    }
                }
            },
            |err| error!("Audio output stream error: {}", err),
            None,
        )
        .map_err(|e| VoiceError::Playback(e.to_string()))
}

impl AudioOutput for CpalOutput {
    fn name(&self) -> &str {
        "cpal speaker"
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        lock_mixer(&self.mixer).current_time()
    }

    fn schedule(&mut self, id: HandleId, frame: &AudioFrame, start_at: f64) -> VoiceResult<f64> {
        Ok(lock_mixer(&self.mixer).schedule(id, frame, start_at))
    }

    fn stop(&mut self, id: HandleId) {
        if !lock_mixer(&self.mixer).stop(id) {
            debug!("Speaker output: {:?} already finished", id);
        }
    }

    fn take_completions(&mut self) -> Option<mpsc::UnboundedReceiver<HandleId>> {
        self.completions.take()
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            thread.shutdown();
        }
    }
}
