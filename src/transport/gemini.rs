//! Gemini Live transport over WebSocket
//!
//! # Connection Flow
//!
//! 1. `connect()` - Open the socket and send `setup`
//! 2. Socket task - Forward outbound events, parse inbound frames
//! 3. `setupComplete` - Reported as `TransportEvent::Open`
//! 4. `OutboundEvent::Close` - Close frame, then `TransportEvent::Closed`
//!
//! Mid-session disconnects are not retried; the controller reports them and
//! waits for a reset.

use futures::{SinkExt, Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::messages::{ClientMessage, ServerMessage};
use super::{
    OutboundEvent, Transport, TransportEvent, TransportSender, TransportSession,
    EVENT_CHANNEL_CAPACITY,
};
use crate::error::{VoiceError, VoiceResult};
use crate::session::SessionConfig;

/// Gemini Live bidirectional endpoint (API key appended as `?key=`)
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Connection timeout for the WebSocket handshake
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GeminiTransport {
    endpoint: String,
    api_key: String,
}

impl GeminiTransport {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", self.endpoint, separator, self.api_key)
    }
}

#[async_trait::async_trait]
impl Transport for GeminiTransport {
    async fn connect(&self, config: &SessionConfig) -> VoiceResult<TransportSession> {
        if self.api_key.is_empty() {
            return Err(VoiceError::Transport("API key is not configured".to_string()));
        }

        info!("Connecting to Gemini Live ({})...", config.model);

        let (ws_stream, _response) = timeout(CONNECTION_TIMEOUT, connect_async(self.url()))
            .await
            .map_err(|_| VoiceError::Transport("Connection timeout".to_string()))?
            .map_err(|e| VoiceError::Transport(e.to_string()))?;

        let (mut write, read) = ws_stream.split();

        let setup = serde_json::to_string(&ClientMessage::setup(config))
            .map_err(|e| VoiceError::Transport(format!("Failed to encode setup: {}", e)))?;
        write
            .send(Message::Text(setup))
            .await
            .map_err(|e| VoiceError::Transport(format!("Failed to send setup: {}", e)))?;

        info!("WebSocket connected, setup sent");

        let (sender, outbound) = TransportSender::channel();
        let (events_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(run_socket(write, read, outbound, events_tx));

        Ok(TransportSession { sender, events })
    }

    fn name(&self) -> &str {
        "gemini-live"
    }
}

async fn run_socket<W, R>(
    mut write: W,
    mut read: R,
    mut outbound: mpsc::UnboundedReceiver<OutboundEvent>,
    events: mpsc::Sender<TransportEvent>,
) where
    W: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    R: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let terminal = loop {
        tokio::select! {
            event = outbound.recv() => {
                let Some(message) = event.and_then(ClientMessage::from_outbound) else {
                    let _ = write.send(Message::Close(None)).await;
                    break TransportEvent::Closed("closed by client".to_string());
                };

                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode outbound message: {}", e);
                        continue;
                    }
                };

                if let Err(e) = write.send(Message::Text(text)).await {
                    break TransportEvent::Error(e.to_string());
                }
            }

            frame = read.next() => {
                let payload = match frame {
                    Some(Ok(Message::Text(text))) => text.into_bytes(),
                    Some(Ok(Message::Binary(bytes))) => bytes,
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                        info!("WebSocket closed by server: {}", reason);
                        break TransportEvent::Closed(reason);
                    }
                    Some(Ok(_)) => continue, // ping/pong handled by tungstenite
                    Some(Err(e)) => break TransportEvent::Error(e.to_string()),
                    None => break TransportEvent::Closed("connection ended".to_string()),
                };

                let message = match ServerMessage::parse(&payload) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Failed to parse server message: {}", e);
                        continue;
                    }
                };

                for event in message.into_events() {
                    if events.send(event).await.is_err() {
                        debug!("Event receiver dropped");
                        return;
                    }
                }
            }
        }
    };

    let _ = events.send(terminal).await;
    debug!("Socket task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_appends_key() {
        let transport = GeminiTransport::new(GEMINI_LIVE_URL, "abc");
        assert!(transport.url().ends_with("BidiGenerateContent?key=abc"));

        let transport = GeminiTransport::new("wss://example.test/live?alt=1", "abc");
        assert_eq!(transport.url(), "wss://example.test/live?alt=1&key=abc");
    }

    #[tokio::test]
    async fn test_missing_key_is_transport_error() {
        let transport = GeminiTransport::new(GEMINI_LIVE_URL, "");
        let err = transport
            .connect(&SessionConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, VoiceError::Transport(_)));
    }
}
