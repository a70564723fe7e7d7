//! In-process transport
//!
//! Each `connect` hands a [`MemoryPeer`] to the paired [`MemoryServer`],
//! which plays the remote model: it sees setup and outbound traffic and
//! injects inbound events.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    InboundEvent, OutboundEvent, Transport, TransportEvent, TransportSender, TransportSession,
    EVENT_CHANNEL_CAPACITY,
};
use crate::audio::codec::TransportBlob;
use crate::error::{VoiceError, VoiceResult};
use crate::session::SessionConfig;
use crate::tools::ToolInvocation;

pub struct MemoryTransport {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refusal: Arc<Mutex<Option<String>>>,
}

/// Accepts sessions opened on the paired [`MemoryTransport`]
pub struct MemoryServer {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
    refusal: Arc<Mutex<Option<String>>>,
}

/// Remote end of one in-process session
pub struct MemoryPeer {
    /// Setup the client connected with
    pub config: SessionConfig,
    events: mpsc::Sender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<OutboundEvent>,
}

impl MemoryTransport {
    pub fn pair() -> (MemoryTransport, MemoryServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let refusal = Arc::new(Mutex::new(None));
        (
            MemoryTransport {
                peers: tx,
                refusal: Arc::clone(&refusal),
            },
            MemoryServer { peers: rx, refusal },
        )
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, config: &SessionConfig) -> VoiceResult<TransportSession> {
        if let Some(reason) = self
            .refusal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(VoiceError::Transport(reason));
        }

        let (sender, outbound) = TransportSender::channel();
        let (events_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        self.peers
            .send(MemoryPeer {
                config: config.clone(),
                events: events_tx,
                outbound,
            })
            .map_err(|_| VoiceError::Transport("memory server is gone".to_string()))?;

        Ok(TransportSession { sender, events })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

impl MemoryServer {
    /// Wait for the next session
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }

    /// Refuse further connections with `reason`, or accept again with `None`
    pub fn refuse(&self, reason: Option<&str>) {
        *self.refusal.lock().unwrap_or_else(PoisonError::into_inner) = reason.map(str::to_string);
    }
}

impl MemoryPeer {
    async fn emit(&self, event: TransportEvent) -> VoiceResult<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| VoiceError::Transport("client is gone".to_string()))
    }

    /// Acknowledge setup
    pub async fn open(&self) -> VoiceResult<()> {
        self.emit(TransportEvent::Open).await
    }

    pub async fn send(&self, event: InboundEvent) -> VoiceResult<()> {
        self.emit(TransportEvent::Message(event)).await
    }

    pub async fn send_audio(&self, blob: TransportBlob) -> VoiceResult<()> {
        self.send(InboundEvent::Audio(blob)).await
    }

    pub async fn send_tool_calls(&self, calls: Vec<ToolInvocation>) -> VoiceResult<()> {
        self.send(InboundEvent::ToolCalls(calls)).await
    }

    pub async fn interrupt(&self) -> VoiceResult<()> {
        self.send(InboundEvent::Interrupted).await
    }

    /// Fail the connection
    pub async fn fail(self, reason: &str) -> VoiceResult<()> {
        self.emit(TransportEvent::Error(reason.to_string())).await
    }

    /// Close the connection from the remote side
    pub async fn close(self, reason: &str) -> VoiceResult<()> {
        self.emit(TransportEvent::Closed(reason.to_string())).await
    }

    /// Next outbound event; `None` once the client dropped its sender
    pub async fn recv(&mut self) -> Option<OutboundEvent> {
        self.outbound.recv().await
    }

    /// Next outbound event that is not audio
    pub async fn recv_control(&mut self) -> Option<OutboundEvent> {
        loop {
            match self.outbound.recv().await? {
                OutboundEvent::Audio(_) => debug!("Memory peer: skipping audio"),
                other => return Some(other),
            }
        }
    }

    /// Whether the client has dropped its session
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}
