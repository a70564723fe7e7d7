// Playback mixer for scheduled model audio
//
// This module provides sample-accurate rendering of buffers scheduled at
// absolute times on an output clock:
// - The mixer's clock is the number of samples rendered so far
// - Each scheduled buffer starts at a fixed sample position
// - Overlapping buffers are summed with clipping
//
// The mixer is shared between the playback scheduler (event loop) and the
// device render callback, so it lives behind a mutex.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::backend::{AudioFrame, AudioOutput, HandleId};
use super::resample::resample_linear;
use crate::error::VoiceResult;

/// Mixer shared between the scheduler and a render thread
pub type SharedMixer = Arc<Mutex<PlaybackMixer>>;

/// Lock a shared mixer, recovering from a poisoned lock
pub fn lock_mixer(mixer: &SharedMixer) -> MutexGuard<'_, PlaybackMixer> {
    mixer.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Voice {
    samples: Vec<f32>,
    start: u64,
}

impl Voice {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Renders scheduled mono buffers onto a sample clock
pub struct PlaybackMixer {
    sample_rate: u32,
    /// Samples rendered since creation
    position: u64,
    voices: BTreeMap<HandleId, Voice>,
    completions: mpsc::UnboundedSender<HandleId>,
}

impl PlaybackMixer {
    pub fn new(sample_rate: u32, completions: mpsc::UnboundedSender<HandleId>) -> Self {
        Self {
            sample_rate,
            position: 0,
            voices: BTreeMap::new(),
            completions,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Current clock in seconds
    pub fn current_time(&self) -> f64 {
        self.position as f64 / self.sample_rate as f64
    }

    /// Number of buffers pending or playing
    pub fn active(&self) -> usize {
        self.voices.len()
    }

    /// Schedule a buffer at `start_at` seconds
    ///
    /// Frames at a different rate are resampled to the mixer rate. A start
    /// time already in the past begins at the current position. Returns the
    /// effective start in seconds.
    pub fn schedule(&mut self, id: HandleId, frame: &AudioFrame, start_at: f64) -> f64 {
        let samples = if frame.sample_rate == self.sample_rate {
            frame.samples.clone()
        } else {
            resample_linear(&frame.samples, frame.sample_rate, self.sample_rate)
        };

        let requested = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;
        let start = requested.max(self.position);

        debug!(
            "Mixer: scheduled {:?} at sample {} ({} samples)",
            id,
            start,
            samples.len()
        );

        self.voices.insert(id, Voice { samples, start });
        start as f64 / self.sample_rate as f64
    }

    /// Stop a buffer without reporting completion
    pub fn stop(&mut self, id: HandleId) -> bool {
        self.voices.remove(&id).is_some()
    }

    /// Render the next `out.len()` samples and advance the clock
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);

        let window_start = self.position;
        let window_end = window_start + out.len() as u64;

        for voice in self.voices.values() {
            let from = voice.start.max(window_start);
            let to = voice.end().min(window_end);
            if from >= to {
                continue;
            }

            for t in from..to {
                let sample = voice.samples[(t - voice.start) as usize];
                out[(t - window_start) as usize] += sample;
            }
        }

        // Clip to prevent overflow
        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.position = window_end;

        let finished: Vec<HandleId> = self
            .voices
            .iter()
            .filter(|(_, voice)| voice.end() <= window_end)
            .map(|(id, _)| *id)
            .collect();

        for id in finished {
            self.voices.remove(&id);
            if self.completions.send(id).is_err() {
                debug!("Mixer: completion receiver dropped");
            }
        }
    }

    /// Advance the clock by `frames` samples, discarding the rendered audio
    pub fn advance(&mut self, frames: usize) {
        let mut scratch = vec![0.0; frames];
        self.render(&mut scratch);
    }
}

/// Software output device
///
/// The clock advances only when driven: manually through a `VirtualClock`
/// (deterministic tests) or by the real-time ticker from `with_realtime_clock`.
pub struct VirtualOutput {
    mixer: SharedMixer,
    completions: Option<mpsc::UnboundedReceiver<HandleId>>,
    sample_rate: u32,
    ticker: Option<JoinHandle<()>>,
}

/// Cloneable handle driving a `VirtualOutput` clock by hand
#[derive(Clone)]
pub struct VirtualClock {
    mixer: SharedMixer,
}

impl VirtualClock {
    /// Advance the clock by `secs`, rendering everything scheduled in between
    pub fn advance(&self, secs: f64) {
        let mut mixer = lock_mixer(&self.mixer);
        let frames = (secs * mixer.sample_rate() as f64).round() as usize;
        mixer.advance(frames);
    }

    pub fn current_time(&self) -> f64 {
        lock_mixer(&self.mixer).current_time()
    }

    /// Buffers still pending or playing on the device
    pub fn active(&self) -> usize {
        lock_mixer(&self.mixer).active()
    }
}

/// Ticker period for the real-time software clock
const TICK_INTERVAL: Duration = Duration::from_millis(10);

impl VirtualOutput {
    pub fn new(sample_rate: u32) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            mixer: Arc::new(Mutex::new(PlaybackMixer::new(sample_rate, tx))),
            completions: Some(rx),
            sample_rate,
            ticker: None,
        }
    }

    /// Drive the clock from wall time on a background task
    ///
    /// Must be called inside a Tokio runtime.
    pub fn with_realtime_clock(mut self) -> Self {
        let mixer = Arc::clone(&self.mixer);
        let sample_rate = self.sample_rate as f64;

        self.ticker = Some(tokio::spawn(async move {
            let started = Instant::now();
            let mut rendered: u64 = 0;
            let mut interval = tokio::time::interval(TICK_INTERVAL);

            loop {
                interval.tick().await;
                let due = (started.elapsed().as_secs_f64() * sample_rate) as u64;
                if due > rendered {
                    lock_mixer(&mixer).advance((due - rendered) as usize);
                    rendered = due;
                }
            }
        }));

        self
    }

    pub fn clock(&self) -> VirtualClock {
        VirtualClock {
            mixer: Arc::clone(&self.mixer),
        }
    }
}

impl AudioOutput for VirtualOutput {
    fn name(&self) -> &str {
        "virtual"
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
            debug!("Virtual output: {:?} already finished", id);
        }
    }

    fn take_completions(&mut self) -> Option<mpsc::UnboundedReceiver<HandleId>> {
        self.completions.take()
    }
}

impl Drop for VirtualOutput {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}
