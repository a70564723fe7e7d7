//! Bidirectional live-session transport
//!
//! A [`Transport`] opens a [`TransportSession`]: a cloneable sender for
//! outbound traffic and a single event stream for everything inbound.
//!
//! Implementations:
//! - `GeminiTransport`: Gemini Live over WebSocket
//! - `MemoryTransport`: in-process peer for tests and demos

pub mod gemini;
pub mod memory;
pub mod messages;

pub use gemini::GeminiTransport;
pub use memory::{MemoryPeer, MemoryServer, MemoryTransport};

use tokio::sync::mpsc;

use crate::audio::codec::TransportBlob;
use crate::error::{VoiceError, VoiceResult};
use crate::session::SessionConfig;
use crate::tools::{ToolInvocation, ToolResponse};

/// Capacity of the inbound event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Decoded inbound message content
///
/// One server message may carry several of these; they are delivered in the
/// order tool calls, audio, interruption, turn completion.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// A chunk of model speech
    Audio(TransportBlob),
    /// A batch of tool calls to answer
    ToolCalls(Vec<ToolInvocation>),
    /// The user started speaking over the model
    Interrupted,
    /// The model finished its turn
    TurnComplete,
    /// The model withdrew pending tool calls
    ToolCallCancellation(Vec<String>),
    /// The server will close the connection soon
    GoAway { time_left: Option<String> },
}

/// Everything the session controller hears from a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Setup acknowledged, the session is usable
    Open,
    Message(InboundEvent),
    /// Connection-level failure; no further events follow
    Error(String),
    /// Connection closed; no further events follow
    Closed(String),
}

/// Outbound traffic queued to the transport task
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    Audio(TransportBlob),
    ToolResponses(Vec<ToolResponse>),
    Close,
}

/// Cloneable, non-blocking handle for sending on a session
#[derive(Debug, Clone)]
pub struct TransportSender {
    tx: mpsc::UnboundedSender<OutboundEvent>,
}

impl TransportSender {
    pub fn new(tx: mpsc::UnboundedSender<OutboundEvent>) -> Self {
        Self { tx }
    }

    /// Sender plus the receiving end a transport task drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn send_audio(&self, blob: TransportBlob) -> VoiceResult<()> {
        self.send(OutboundEvent::Audio(blob))
    }

    pub fn send_tool_responses(&self, responses: Vec<ToolResponse>) -> VoiceResult<()> {
        if responses.is_empty() {
            return Ok(());
        }
        self.send(OutboundEvent::ToolResponses(responses))
    }

    /// Ask the transport to close; further sends fail
    pub fn close(&self) {
        let _ = self.tx.send(OutboundEvent::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, event: OutboundEvent) -> VoiceResult<()> {
        self.tx
            .send(event)
            .map_err(|_| VoiceError::Transport("session is closed".to_string()))
    }
}

/// An open live session
pub struct TransportSession {
    pub sender: TransportSender,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens live sessions
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Connect and send setup for `config`
    ///
    /// Returns once the connection is up; `TransportEvent::Open` follows when
    /// the remote side acknowledges setup.
    async fn connect(&self, config: &SessionConfig) -> VoiceResult<TransportSession>;

    /// Get transport name for logging
    fn name(&self) -> &str;
}
