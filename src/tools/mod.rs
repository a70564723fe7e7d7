//! Tool calls requested by the model
//!
//! Handlers register by name into a [`ToolRegistry`]. Every invocation gets
//! exactly one response carrying its correlation id, including unknown
//! actions and invalid arguments, so the remote turn never hangs.

mod notes;
mod registry;

pub use notes::{NoteBook, RecordNoteTool, RecordedNote, RECORD_NOTE_TOOL};
pub use registry::ToolRegistry;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::VoiceError;

/// Function declaration advertised to the model at session setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// Schema object: `type`, `properties`, `required`
    pub parameters: Value,
}

impl ToolDeclaration {
    /// Names listed under `required`
    pub fn required(&self) -> Vec<&str> {
        self.parameters
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Declared type of a property, if any
    pub fn property_type(&self, name: &str) -> Option<&str> {
        self.parameters
            .get("properties")?
            .get(name)?
            .get("type")?
            .as_str()
    }
}

/// A tool call from the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Correlation id assigned by the remote side
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// Reply to exactly one [`ToolInvocation`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
    /// Set when `response` is a failure payload; never sent on the wire
    #[serde(skip)]
    pub failed: bool,
}

impl ToolResponse {
    pub fn success(invocation: ToolInvocation, payload: Value) -> Self {
        Self {
            id: invocation.id,
            name: invocation.name,
            response: payload,
            failed: false,
        }
    }

    pub fn failure(invocation: ToolInvocation, error: &VoiceError) -> Self {
        Self {
            id: invocation.id,
            name: invocation.name,
            response: failure_payload(error),
            failed: true,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failed
    }
}

/// An action the model can invoke
pub trait ToolHandler: Send + Sync {
    fn declaration(&self) -> ToolDeclaration;

    /// Run the action with already-validated arguments
    fn call(&self, args: &Map<String, Value>) -> Result<Value, VoiceError>;
}

/// Structured failure payload returned to the model
pub fn failure_payload(error: &VoiceError) -> Value {
    let code = match error {
        VoiceError::UnsupportedToolAction(_) => "unsupported_action",
        VoiceError::InvalidToolArguments { .. } => "invalid_arguments",
        _ => "internal_error",
    };

    json!({
        "error": {
            "code": code,
            "message": error.to_string(),
        }
    })
}
