use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use super::backend::AudioFrame;

/// Most recent RMS level of each audio direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AudioLevels {
    /// Microphone level, 0.0 to 1.0
    pub input: f32,
    /// Model speech level, 0.0 to 1.0
    pub output: f32,
}

/// Root-mean-square level of a frame
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt().min(1.0)
}

/// Follows the capture and playback taps and keeps their latest levels
pub struct LevelMeter {
    levels: Arc<Mutex<AudioLevels>>,
    tasks: Vec<JoinHandle<()>>,
}

impl LevelMeter {
    pub fn spawn(
        input: broadcast::Receiver<AudioFrame>,
        output: broadcast::Receiver<AudioFrame>,
    ) -> Self {
        let levels = Arc::new(Mutex::new(AudioLevels::default()));

        let tasks = vec![
            tokio::spawn(follow(input, Arc::clone(&levels), |l, v| l.input = v)),
            tokio::spawn(follow(output, Arc::clone(&levels), |l, v| l.output = v)),
        ];

        Self { levels, tasks }
    }

    pub fn levels(&self) -> AudioLevels {
        *self.levels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for LevelMeter {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn follow(
    mut frames: broadcast::Receiver<AudioFrame>,
    levels: Arc<Mutex<AudioLevels>>,
    update: fn(&mut AudioLevels, f32),
) {
    loop {
        match frames.recv().await {
            Ok(frame) => {
                let level = rms(&frame.samples);
                update(&mut levels.lock().unwrap_or_else(PoisonError::into_inner), level);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Level meter lagged by {} frames", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
