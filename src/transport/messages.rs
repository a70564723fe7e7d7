//! Gemini Live wire messages
//!
//! Client messages are objects with exactly one top-level key (`setup`,
//! `realtimeInput`, `toolResponse`). Server messages may combine several
//! fields; [`ServerMessage::into_events`] flattens them in a fixed order.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{InboundEvent, OutboundEvent, TransportEvent};
use crate::audio::codec::TransportBlob;
use crate::session::SessionConfig;
use crate::tools::{ToolDeclaration, ToolInvocation, ToolResponse};

// ============================================================================
// Client → server
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponseMessage),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSet>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSet {
    pub function_declarations: Vec<ToolDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponseMessage {
    pub function_responses: Vec<ToolResponse>,
}

impl ClientMessage {
    pub fn setup(config: &SessionConfig) -> Self {
        let system_instruction = (!config.system_instruction.is_empty()).then(|| Content {
            parts: vec![Part {
                text: Some(config.system_instruction.clone()),
                inline_data: None,
            }],
        });

        let speech_config = config.voice.as_ref().map(|voice| SpeechConfig {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig {
                    voice_name: voice.clone(),
                },
            },
        });

        let tools = if config.tools.is_empty() {
            Vec::new()
        } else {
            vec![ToolSet {
                function_declarations: config.tools.clone(),
            }]
        };

        ClientMessage::Setup(Setup {
            model: config.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec![config.response_modality.as_wire().to_string()],
                speech_config,
            },
            system_instruction,
            tools,
        })
    }

    /// Wire message for an outbound event; `None` for `Close`
    pub fn from_outbound(event: OutboundEvent) -> Option<Self> {
        match event {
            OutboundEvent::Audio(blob) => Some(ClientMessage::RealtimeInput(RealtimeInput {
                media_chunks: vec![Blob::from(&blob)],
            })),
            OutboundEvent::ToolResponses(responses) => {
                Some(ClientMessage::ToolResponse(ToolResponseMessage {
                    function_responses: responses,
                }))
            }
            OutboundEvent::Close => None,
        }
    }
}

// ============================================================================
// Shared
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

/// Base64 media payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

impl From<&TransportBlob> for Blob {
    fn from(blob: &TransportBlob) -> Self {
        Self {
            mime_type: blob.mime_type.clone(),
            data: blob.to_base64(),
        }
    }
}

// ============================================================================
// Server → client
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCall>,
    #[serde(default)]
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

impl ServerMessage {
    pub fn parse(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }

    /// Flatten into events: open, tool calls, audio, interruption, turn end
    ///
    /// Audio parts with undecodable payloads are dropped here.
    pub fn into_events(self) -> Vec<TransportEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(TransportEvent::Open);
        }

        if let Some(tool_call) = self.tool_call {
            let calls: Vec<ToolInvocation> = tool_call
                .function_calls
                .into_iter()
                .map(|call| ToolInvocation {
                    id: call.id,
                    name: call.name,
                    args: call.args.unwrap_or_default(),
                })
                .collect();
            if !calls.is_empty() {
                events.push(TransportEvent::Message(InboundEvent::ToolCalls(calls)));
            }
        }

        if let Some(content) = self.server_content {
            for part in content.model_turn.map(|turn| turn.parts).unwrap_or_default() {
                if let Some(text) = part.text {
                    debug!("Model text: {}", text);
                }

                let Some(inline) = part.inline_data else {
                    continue;
                };

                if !inline.mime_type.starts_with("audio/") {
                    debug!("Ignoring inline {} data", inline.mime_type);
                    continue;
                }

                match TransportBlob::from_base64(&inline.data, inline.mime_type) {
                    Ok(blob) => events.push(TransportEvent::Message(InboundEvent::Audio(blob))),
                    Err(e) => warn!("Dropping audio part: {}", e),
                }
            }

            if content.interrupted {
                events.push(TransportEvent::Message(InboundEvent::Interrupted));
            }
            if content.turn_complete {
                events.push(TransportEvent::Message(InboundEvent::TurnComplete));
            }
        }

        if let Some(cancellation) = self.tool_call_cancellation {
            events.push(TransportEvent::Message(InboundEvent::ToolCallCancellation(
                cancellation.ids,
            )));
        }

        if let Some(go_away) = self.go_away {
            events.push(TransportEvent::Message(InboundEvent::GoAway {
                time_left: go_away.time_left,
            }));
        }

        events
    }
}
