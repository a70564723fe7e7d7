//! Capture pipeline: microphone frames → codec → transport
//!
//! Device acquisition can wait on a permission prompt, so it runs on its own
//! task that temporarily owns the input and hands it back with the result.
//! Every acquisition carries a generation; stopping bumps the generation, and
//! a grant that arrives for an old generation is released immediately. When a
//! running device stops delivering frames on its own, the pump reports it on
//! the same channel so the session can leave the capturing state.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioFrame, AudioInput};
use super::codec;
use crate::error::{VoiceError, VoiceResult};
use crate::session::SessionCounters;
use crate::transport::TransportSender;

/// Result of a device acquisition, delivered to the session event loop
pub struct CaptureOutcome {
    pub generation: u64,
    input: Box<dyn AudioInput>,
    result: VoiceResult<mpsc::Receiver<AudioFrame>>,
}

/// Notice from a capture task, delivered to the session event loop
pub enum CaptureEvent {
    /// A device acquisition finished
    Acquired(CaptureOutcome),
    /// The running device stopped delivering frames
    SourceClosed { generation: u64 },
}

/// What the pipeline did with a [`CaptureEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureProgress {
    /// Frames are flowing to the transport
    Started,
    /// The input ran out of frames cleanly and has been released
    Finished,
    /// The event was for a cancelled request or an old stream
    Discarded,
}

enum Slot {
    /// Device owned and idle
    Ready(Box<dyn AudioInput>),
    /// Device lent to an acquisition task
    Acquiring {
        generation: u64,
        cancel: Option<oneshot::Sender<()>>,
    },
    /// Device running, frames pumped to the transport
    Running {
        input: Box<dyn AudioInput>,
        pump: JoinHandle<()>,
    },
}

pub struct CapturePipeline {
    slot: Slot,
    generation: u64,
    restart_requested: bool,
    events: mpsc::UnboundedSender<CaptureEvent>,
    tap: broadcast::Sender<AudioFrame>,
    counters: Arc<SessionCounters>,
}

impl CapturePipeline {
    pub fn new(
        input: Box<dyn AudioInput>,
        events: mpsc::UnboundedSender<CaptureEvent>,
        tap: broadcast::Sender<AudioFrame>,
        counters: Arc<SessionCounters>,
    ) -> Self {
        Self {
            slot: Slot::Ready(input),
            generation: 0,
            restart_requested: false,
            events,
            tap,
            counters,
        }
    }

    /// Frames are currently flowing
    pub fn is_running(&self) -> bool {
        matches!(self.slot, Slot::Running { .. })
    }

    /// An acquisition for the current generation is in flight
    pub fn is_acquiring(&self) -> bool {
        matches!(&self.slot, Slot::Acquiring { cancel: Some(_), .. })
    }

    /// Request the device; the outcome arrives on the events channel
    ///
    /// Starting while already running or acquiring is a no-op. If a cancelled
    /// acquisition still holds the device, a new one starts when it returns.
    pub fn begin(&mut self) {
        let input = match std::mem::replace(
            &mut self.slot,
            Slot::Acquiring {
                generation: self.generation,
                cancel: None,
            },
        ) {
            Slot::Ready(input) => input,
            Slot::Acquiring {
                generation,
                cancel: Some(cancel),
            } => {
                debug!("Capture: acquisition already in progress");
                self.slot = Slot::Acquiring {
                    generation,
                    cancel: Some(cancel),
                };
                return;
            }
            Slot::Acquiring {
                generation,
                cancel: None,
            } => {
                debug!("Capture: device still being released, restart queued");
                self.restart_requested = true;
                self.slot = Slot::Acquiring {
                    generation,
                    cancel: None,
                };
                return;
            }
            running @ Slot::Running { .. } => {
                debug!("Capture: already running");
                self.slot = running;
                return;
            }
        };

        self.generation += 1;
        let generation = self.generation;
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let events = self.events.clone();

        info!("Capture: acquiring {} (generation {})", input.name(), generation);

        tokio::spawn(async move {
            let mut input = input;
            let result = tokio::select! {
                result = input.start() => result,
                _ = cancel_rx => Err(VoiceError::CaptureUnavailable(
                    "acquisition cancelled".to_string(),
                )),
            };

            let _ = events.send(CaptureEvent::Acquired(CaptureOutcome {
                generation,
                input,
                result,
            }));
        });

        self.slot = Slot::Acquiring {
            generation,
            cancel: Some(cancel_tx),
        };
    }

    /// Take back the device from an acquisition task
    ///
    /// Starts pumping frames to `sender` when the grant is still wanted.
    pub async fn complete(
        &mut self,
        outcome: CaptureOutcome,
        sender: Option<TransportSender>,
    ) -> VoiceResult<CaptureProgress> {
        let CaptureOutcome {
            generation,
            mut input,
            result,
        } = outcome;

        let wanted = matches!(
            &self.slot,
            Slot::Acquiring { generation: g, cancel: Some(_) } if *g == generation
        ) && generation == self.generation;

        match (wanted, result, sender) {
            (true, Ok(frames), Some(sender)) => {
                let pump = tokio::spawn(pump_frames(
                    generation,
                    frames,
                    sender,
                    self.tap.clone(),
                    Arc::clone(&self.counters),
                    self.events.clone(),
                ));
                info!("Capture: {} streaming", input.name());
                self.slot = Slot::Running { input, pump };
                Ok(CaptureProgress::Started)
            }
            (true, Err(e), _) => {
                warn!("Capture: {} unavailable: {}", input.name(), e);
                self.slot = Slot::Ready(input);
                Err(e)
            }
            (wanted, result, _) => {
                if result.is_ok() {
                    if let Err(e) = input.stop().await {
                        warn!("Capture: failed to release late grant: {}", e);
                    }
                }
                debug!(
                    "Capture: discarded outcome for generation {} (wanted: {})",
                    generation, wanted
                );
                self.slot = Slot::Ready(input);

                if std::mem::take(&mut self.restart_requested) {
                    self.begin();
                }
                Ok(CaptureProgress::Discarded)
            }
        }
    }

    /// Release a device whose frame stream ended without being stopped
    ///
    /// A stream that ended because the device failed is reported as
    /// `CaptureUnavailable`; a clean end of input is `Finished`.
    pub async fn source_closed(&mut self, generation: u64) -> VoiceResult<CaptureProgress> {
        if generation != self.generation || !self.is_running() {
            debug!("Capture: ignoring end of stream for generation {}", generation);
            return Ok(CaptureProgress::Discarded);
        }

        let (mut input, pump) = match std::mem::replace(
            &mut self.slot,
            Slot::Acquiring {
                generation,
                cancel: None,
            },
        ) {
            Slot::Running { input, pump } => (input, pump),
            other => {
                self.slot = other;
                return Ok(CaptureProgress::Discarded);
            }
        };

        pump.abort();
        let failure = input.take_error();
        if let Err(e) = input.stop().await {
            warn!("Capture: failed to release {}: {}", input.name(), e);
        }
        self.generation += 1;

        let name = input.name().to_string();
        self.slot = Slot::Ready(input);

        match failure {
            Some(e) => {
                warn!("Capture: {} failed while streaming: {}", name, e);
                Err(e)
            }
            None => {
                info!("Capture: {} has no more frames", name);
                Ok(CaptureProgress::Finished)
            }
        }
    }

    /// Stop capture and release the device
    ///
    /// A pending acquisition is cancelled; its device comes back through
    /// `complete` and is released there.
    pub async fn stop(&mut self) {
        self.restart_requested = false;

        match std::mem::replace(
            &mut self.slot,
            Slot::Acquiring {
                generation: self.generation,
                cancel: None,
            },
        ) {
            Slot::Ready(input) => {
                self.slot = Slot::Ready(input);
            }
            Slot::Acquiring { generation, cancel } => {
                if let Some(cancel) = cancel {
                    info!("Capture: cancelling acquisition (generation {})", generation);
                    let _ = cancel.send(());
                }
                self.generation += 1;
                self.slot = Slot::Acquiring {
                    generation,
                    cancel: None,
                };
            }
            Slot::Running { mut input, pump } => {
                pump.abort();
                if let Err(e) = input.stop().await {
                    warn!("Capture: failed to stop {}: {}", input.name(), e);
                }
                info!("Capture: {} stopped", input.name());
                self.generation += 1;
                self.slot = Slot::Ready(input);
            }
        }
    }
}

/// Number of frames between progress logs (~5s at 16ms frames)
const LOG_EVERY_FRAMES: u64 = 300;

async fn pump_frames(
    generation: u64,
    mut frames: mpsc::Receiver<AudioFrame>,
    sender: TransportSender,
    tap: broadcast::Sender<AudioFrame>,
    counters: Arc<SessionCounters>,
    events: mpsc::UnboundedSender<CaptureEvent>,
) {
    while let Some(frame) = frames.recv().await {
        if tap.receiver_count() > 0 {
            let _ = tap.send(frame.clone());
        }

        let blob = codec::encode(&frame);

        match sender.send_audio(blob) {
            Ok(()) => {
                let sent = SessionCounters::incr(&counters.frames_sent);
                if sent % LOG_EVERY_FRAMES == 0 {
                    debug!("Capture: sent {} frames", sent);
                }
            }
            Err(e) => {
                SessionCounters::incr(&counters.frames_dropped);
                warn!("Capture: dropping frame: {}", e);
            }
        }
    }

    debug!("Capture: frame source closed (generation {})", generation);
    let _ = events.send(CaptureEvent::SourceClosed { generation });
}
