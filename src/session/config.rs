use serde::{Deserialize, Serialize};

use crate::tools::ToolDeclaration;

/// Native-audio model used when none is configured
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

/// Prebuilt voice used when none is configured
pub const DEFAULT_VOICE: &str = "Charon";

/// What the model answers with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseModality {
    Audio,
    Text,
}

impl ResponseModality {
    /// Name used on the wire
    pub fn as_wire(&self) -> &'static str {
        match self {
            ResponseModality::Audio => "AUDIO",
            ResponseModality::Text => "TEXT",
        }
    }
}

/// Parameters of a live session, sent once at setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Model resource name, e.g. "models/gemini-2.5-flash-native-audio-preview-09-2025"
    pub model: String,

    /// Persona and behavior instructions
    pub system_instruction: String,

    /// Prebuilt voice name (audio responses only)
    pub voice: Option<String>,

    pub response_modality: ResponseModality,

    /// Filled from the tool registry when the controller starts
    #[serde(default)]
    pub tools: Vec<ToolDeclaration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system_instruction: String::new(),
            voice: Some(DEFAULT_VOICE.to_string()),
            response_modality: ResponseModality::Audio,
            tools: Vec::new(),
        }
    }
}
