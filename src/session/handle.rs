use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

use super::state::{SessionSnapshot, SessionState};
use super::stats::{SessionCounters, SessionStats};
use crate::audio::AudioFrame;
use crate::error::{VoiceError, VoiceResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Start,
    StartCapture,
    PauseCapture,
    Reset,
    Shutdown,
}

/// Cloneable handle to a running session controller
///
/// Commands are queued and applied in order by the controller; their effect
/// shows up in the next published snapshot.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    input_tap: broadcast::Sender<AudioFrame>,
    output_tap: broadcast::Sender<AudioFrame>,
    counters: Arc<SessionCounters>,
}

impl SessionHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        snapshot: watch::Receiver<SessionSnapshot>,
        input_tap: broadcast::Sender<AudioFrame>,
        output_tap: broadcast::Sender<AudioFrame>,
        counters: Arc<SessionCounters>,
    ) -> Self {
        Self {
            commands,
            snapshot,
            input_tap,
            output_tap,
            counters,
        }
    }

    fn send(&self, command: Command) -> VoiceResult<()> {
        self.commands
            .send(command)
            .map_err(|_| VoiceError::ControllerStopped)
    }

    /// Connect from `Disconnected`
    pub fn start(&self) -> VoiceResult<()> {
        self.send(Command::Start)
    }

    /// Turn the microphone on (from `Idle`, or `Error` with a live session)
    pub fn start_capture(&self) -> VoiceResult<()> {
        self.send(Command::StartCapture)
    }

    /// Turn the microphone off; model audio keeps playing
    pub fn pause_capture(&self) -> VoiceResult<()> {
        self.send(Command::PauseCapture)
    }

    /// Drop the session, clear notes and playback, and reconnect
    pub fn reset(&self) -> VoiceResult<()> {
        self.send(Command::Reset)
    }

    /// Stop the controller; the handle is unusable afterwards
    pub fn shutdown(&self) -> VoiceResult<()> {
        self.send(Command::Shutdown)
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().state
    }

    /// Receiver notified on every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until a snapshot satisfies `predicate`
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> VoiceResult<SessionSnapshot> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(predicate)
            .await
            .map_err(|_| VoiceError::ControllerStopped)?;
        Ok(snapshot.clone())
    }

    /// Wait until the session reaches `state`
    pub async fn wait_for_state(&self, state: SessionState) -> VoiceResult<SessionSnapshot> {
        self.wait_for(|snapshot| snapshot.state == state).await
    }

    /// Live counters, fresher than the last snapshot
    pub fn stats(&self) -> SessionStats {
        let started_at = self.snapshot.borrow().stats.started_at;
        self.counters.snapshot(started_at)
    }

    /// Microphone frames before encoding
    pub fn subscribe_input_tap(&self) -> broadcast::Receiver<AudioFrame> {
        self.input_tap.subscribe()
    }

    /// Model audio after decoding
    pub fn subscribe_output_tap(&self) -> broadcast::Receiver<AudioFrame> {
        self.output_tap.subscribe()
    }
}
