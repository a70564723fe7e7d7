//! Session controller
//!
//! A single task owns every piece of mutable session state: lifecycle,
//! capture pipeline, playback scheduler and the live transport. It reacts to
//! four sources in one `select!` loop:
//! - commands from [`SessionHandle`]s
//! - connection attempts finishing
//! - microphone acquisition finishing or its stream ending
//! - transport events and playback completions
//!
//! Observers read the published [`SessionSnapshot`] through a watch channel.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use super::handle::{Command, SessionHandle};
use super::state::{SessionSnapshot, SessionState};
use super::stats::SessionCounters;
use super::SessionConfig;
use crate::audio::{
    AudioFrame, AudioInput, AudioOutput, CaptureEvent, CapturePipeline, CaptureProgress, HandleId,
    PlaybackScheduler,
};
use crate::error::{VoiceError, VoiceResult};
use crate::tools::{NoteBook, ToolRegistry};
use crate::transport::{InboundEvent, Transport, TransportEvent, TransportSender, TransportSession};

/// Capacity of each audio tap
const TAP_CAPACITY: usize = 64;

/// Everything a session controller needs
pub struct SessionParts {
    pub config: SessionConfig,
    pub transport: Arc<dyn Transport>,
    pub input: Box<dyn AudioInput>,
    pub output: Box<dyn AudioOutput>,
    pub tools: ToolRegistry,
    /// Notebook the registered note tool writes to
    pub notes: NoteBook,
}

struct Connected {
    generation: u64,
    result: VoiceResult<TransportSession>,
}

struct ActiveSession {
    sender: TransportSender,
    events: mpsc::Receiver<TransportEvent>,
}

enum Wake {
    Command(Option<Command>),
    Connected(Connected),
    Capture(CaptureEvent),
    PlaybackEnded(HandleId),
    Transport(Option<TransportEvent>),
}

pub struct SessionController {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    capture: CapturePipeline,
    capture_events: mpsc::UnboundedReceiver<CaptureEvent>,
    scheduler: PlaybackScheduler,
    playback_completions: Option<mpsc::UnboundedReceiver<HandleId>>,
    tools: ToolRegistry,
    notes: NoteBook,
    counters: Arc<SessionCounters>,

    state: SessionState,
    status: String,
    error: Option<String>,
    session_id: Option<String>,
    started_at: Option<DateTime<Utc>>,

    session: Option<ActiveSession>,
    connection_generation: u64,
    connect_tx: mpsc::UnboundedSender<Connected>,
    connect_rx: mpsc::UnboundedReceiver<Connected>,

    commands: mpsc::UnboundedReceiver<Command>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl SessionController {
    /// Build a controller and the handle that drives it
    pub fn new(parts: SessionParts) -> (SessionController, SessionHandle) {
        let SessionParts {
            mut config,
            transport,
            input,
            output,
            tools,
            notes,
        } = parts;

        config.tools = tools.declarations();

        let counters = Arc::new(SessionCounters::default());
        let (input_tap, _) = broadcast::channel::<AudioFrame>(TAP_CAPACITY);
        let (output_tap, _) = broadcast::channel::<AudioFrame>(TAP_CAPACITY);
        let (capture_tx, capture_events) = mpsc::unbounded_channel();
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (connect_tx, connect_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

        let capture =
            CapturePipeline::new(input, capture_tx, input_tap.clone(), Arc::clone(&counters));
        let mut scheduler =
            PlaybackScheduler::new(output, output_tap.clone(), Arc::clone(&counters));
        let playback_completions = scheduler.take_completions();
        if playback_completions.is_none() {
            warn!("Output completions already taken; finished chunks will not be reported");
        }

        let handle = SessionHandle::new(
            command_tx,
            snapshot_rx,
            input_tap,
            output_tap,
            Arc::clone(&counters),
        );

        let controller = SessionController {
            config,
            transport,
            capture,
            capture_events,
            scheduler,
            playback_completions,
            tools,
            notes,
            counters,
            state: SessionState::Disconnected,
            status: SessionSnapshot::default().status,
            error: None,
            session_id: None,
            started_at: None,
            session: None,
            connection_generation: 0,
            connect_tx,
            connect_rx,
            commands,
            snapshot_tx,
        };

        (controller, handle)
    }

    /// Spawn the controller on the current runtime
    pub fn spawn(parts: SessionParts) -> SessionHandle {
        let (controller, handle) = SessionController::new(parts);
        tokio::spawn(controller.run());
        handle
    }

    /// Run until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        info!("Session controller started ({})", self.transport.name());
        self.publish();

        loop {
            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                Some(connected) = self.connect_rx.recv() => Wake::Connected(connected),
                Some(event) = self.capture_events.recv() => Wake::Capture(event),
                Some(id) = recv_completion(&mut self.playback_completions) => Wake::PlaybackEnded(id),
                event = recv_transport(&mut self.session) => Wake::Transport(event),
            };

            match wake {
                Wake::Command(None) | Wake::Command(Some(Command::Shutdown)) => break,
                Wake::Command(Some(command)) => self.handle_command(command).await,
                Wake::Connected(connected) => self.handle_connected(connected),
                Wake::Capture(event) => self.handle_capture(event).await,
                Wake::PlaybackEnded(id) => {
                    self.scheduler.on_ended(id);
                    if !self.scheduler.is_playing() {
                        self.publish();
                    }
                }
                Wake::Transport(Some(event)) => self.handle_transport(event).await,
                Wake::Transport(None) => {
                    self.handle_transport(TransportEvent::Closed("transport ended".to_string()))
                        .await
                }
            }
        }

        self.shutdown().await;
    }

    async fn handle_command(&mut self, command: Command) {
        debug!("Command: {:?} in state {}", command, self.state);

        match command {
            Command::Start => self.start(),
            Command::StartCapture => self.start_capture(),
            Command::PauseCapture => self.pause_capture().await,
            Command::Reset => self.reset().await,
            Command::Shutdown => {}
        }
    }

    fn start(&mut self) {
        if self.state != SessionState::Disconnected {
            debug!("Start ignored in state {}", self.state);
            return;
        }
        self.connect("Connecting...");
    }

    /// Open a new session; any attempt still in flight becomes stale
    fn connect(&mut self, status: &str) {
        self.connection_generation += 1;
        let generation = self.connection_generation;
        let session_id = format!("live-{}", uuid::Uuid::new_v4());

        info!("Connecting session {} (attempt {})", session_id, generation);

        self.session_id = Some(session_id);
        self.started_at = Some(Utc::now());
        self.state = SessionState::Connecting;
        self.status = status.to_string();
        self.publish();

        let transport = Arc::clone(&self.transport);
        let config = self.config.clone();
        let connect_tx = self.connect_tx.clone();

        tokio::spawn(async move {
            let result = transport.connect(&config).await;
            let _ = connect_tx.send(Connected { generation, result });
        });
    }

    fn handle_connected(&mut self, connected: Connected) {
        let Connected { generation, result } = connected;

        if generation != self.connection_generation || self.state != SessionState::Connecting {
            debug!("Discarding stale connection attempt {}", generation);
            if let Ok(session) = result {
                session.sender.close();
            }
            return;
        }

        match result {
            Ok(session) => {
                info!("Transport connected, waiting for setup acknowledgement");
                self.session = Some(ActiveSession {
                    sender: session.sender,
                    events: session.events,
                });
            }
            Err(e) => {
                error!("Connection failed: {}", e);
                self.fail(e, "Connection failed");
            }
        }
    }

    fn start_capture(&mut self) {
        if self.session.is_none() {
            warn!("Capture requested without a live session (state {})", self.state);
            return;
        }

        match self.state {
            SessionState::Idle | SessionState::Error => {}
            SessionState::Capturing => {
                debug!("Already capturing");
                return;
            }
            SessionState::Connecting | SessionState::Disconnected => {
                warn!("Capture requested before the session opened");
                return;
            }
        }

        self.state = SessionState::Capturing;
        self.status = "Requesting microphone access...".to_string();
        self.error = None;
        self.capture.begin();
        self.publish();
    }

    async fn pause_capture(&mut self) {
        if self.state != SessionState::Capturing {
            debug!("Pause ignored in state {}", self.state);
            return;
        }

        self.capture.stop().await;
        self.state = SessionState::Idle;
        self.status = "Capture paused.".to_string();
        self.publish();
    }

    async fn handle_capture(&mut self, event: CaptureEvent) {
        let progress = match event {
            CaptureEvent::Acquired(outcome) => {
                let sender = self.session.as_ref().map(|s| s.sender.clone());
                self.capture.complete(outcome, sender).await
            }
            CaptureEvent::SourceClosed { generation } => {
                self.capture.source_closed(generation).await
            }
        };

        match progress {
            Ok(CaptureProgress::Started) => {
                if self.state == SessionState::Capturing {
                    self.status = "Listening...".to_string();
                    self.publish();
                }
            }
            Ok(CaptureProgress::Finished) => {
                if self.state == SessionState::Capturing {
                    info!("Capture input ended");
                    self.state = SessionState::Idle;
                    self.status = "Capture ended.".to_string();
                    self.publish();
                }
            }
            Ok(CaptureProgress::Discarded) => {}
            Err(e) => {
                warn!("Microphone unavailable: {}", e);
                // Transport stays up so model audio keeps playing
                self.state = SessionState::Error;
                self.status = "Microphone unavailable.".to_string();
                self.error = Some(e.to_string());
                self.publish();
            }
        }
    }

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => {
                if self.state == SessionState::Connecting {
                    info!("Session open");
                    self.state = SessionState::Idle;
                    self.status = "Connection established. Start capture to talk.".to_string();
                    self.publish();
                }
            }
            TransportEvent::Message(message) => self.handle_message(message),
            TransportEvent::Error(reason) => {
                error!("Transport error: {}", reason);
                self.capture.stop().await;
                self.scheduler.interrupt();
                self.fail(VoiceError::Transport(reason), "Connection lost.");
            }
            TransportEvent::Closed(reason) => {
                info!("Transport closed: {}", reason);
                self.capture.stop().await;
                self.session = None;
                self.state = SessionState::Disconnected;
                self.status = format!("Disconnected: {}", reason);
                self.publish();
            }
        }
    }

    fn handle_message(&mut self, message: InboundEvent) {
        match message {
            InboundEvent::Audio(blob) => {
                let was_playing = self.scheduler.is_playing();
                // Malformed chunks are counted and logged by the scheduler
                if self.scheduler.enqueue(&blob).is_ok() && !was_playing {
                    self.publish();
                }
            }
            InboundEvent::ToolCalls(calls) => {
                info!("Tool calls received: {}", calls.len());
                let responses = self.tools.dispatch(calls);

                SessionCounters::add(&self.counters.tool_calls, responses.len() as u64);
                let failures = responses.iter().filter(|r| r.is_failure()).count();
                SessionCounters::add(&self.counters.tool_failures, failures as u64);

                if let Some(session) = &self.session {
                    if let Err(e) = session.sender.send_tool_responses(responses) {
                        warn!("Failed to send tool responses: {}", e);
                    }
                }
                self.publish();
            }
            InboundEvent::Interrupted => {
                let stopped = self.scheduler.interrupt();
                SessionCounters::incr(&self.counters.interruptions);
                debug!("Interrupted, {} chunks dropped", stopped);
                self.publish();
            }
            InboundEvent::TurnComplete => debug!("Model turn complete"),
            InboundEvent::ToolCallCancellation(ids) => {
                info!("Model cancelled tool calls: {:?}", ids);
            }
            InboundEvent::GoAway { time_left } => {
                warn!("Server closing soon (time left: {:?})", time_left);
            }
        }
    }

    /// Close everything, clear notes and playback, and connect again
    async fn reset(&mut self) {
        info!("Resetting session");

        self.capture.stop().await;
        if let Some(session) = self.session.take() {
            session.sender.close();
        }
        self.notes.clear();
        self.scheduler.reset();
        self.counters.reset();
        self.error = None;

        self.connect("Session reset. Reconnecting...");
    }

    /// Enter `Error` after a connection-level failure
    fn fail(&mut self, error: VoiceError, status: &str) {
        if let Some(session) = self.session.take() {
            session.sender.close();
        }
        self.state = SessionState::Error;
        self.status = status.to_string();
        self.error = Some(error.to_string());
        self.publish();
    }

    async fn shutdown(&mut self) {
        info!("Session controller stopping");
        self.capture.stop().await;
        if let Some(session) = self.session.take() {
            session.sender.close();
        }
        self.scheduler.reset();
        self.state = SessionState::Disconnected;
        self.status = "Stopped.".to_string();
        self.publish();
    }

    fn publish(&self) {
        let snapshot = SessionSnapshot {
            session_id: self.session_id.clone(),
            state: self.state,
            status: self.status.clone(),
            error: self.error.clone(),
            notes: self.notes.snapshot(),
            playing: self.scheduler.is_playing(),
            stats: self.counters.snapshot(self.started_at),
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}

async fn recv_completion(
    completions: &mut Option<mpsc::UnboundedReceiver<HandleId>>,
) -> Option<HandleId> {
    match completions {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn recv_transport(session: &mut Option<ActiveSession>) -> Option<TransportEvent> {
    match session {
        Some(session) => session.events.recv().await,
        None => std::future::pending().await,
    }
}
