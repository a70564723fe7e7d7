use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

use super::{ToolDeclaration, ToolHandler};
use crate::error::VoiceError;

pub const RECORD_NOTE_TOOL: &str = "record_interview_note";

/// A note the model saved during the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedNote {
    /// e.g. "Salary Expectation", "Feedback", "Action Item"
    pub category: String,
    pub content: String,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only note log, cleared only by a session reset
#[derive(Debug, Clone, Default)]
pub struct NoteBook {
    notes: Arc<Mutex<Vec<RecordedNote>>>,
}

impl NoteBook {
    fn lock(&self) -> MutexGuard<'_, Vec<RecordedNote>> {
        self.notes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, note: RecordedNote) {
        self.lock().push(note);
    }

    /// Notes in the order they were recorded
    pub fn snapshot(&self) -> Vec<RecordedNote> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// `record_interview_note`: append a categorized note to the notebook
pub struct RecordNoteTool {
    notes: NoteBook,
}

impl RecordNoteTool {
    pub fn new(notes: NoteBook) -> Self {
        Self { notes }
    }
}

impl ToolHandler for RecordNoteTool {
    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: RECORD_NOTE_TOOL.to_string(),
            description: "Records a specific note, feedback, or data point mentioned during \
                          the interview into the candidate tracking system."
                .to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "category": {
                        "type": "STRING",
                        "description": "The category of the note (e.g., Salary Expectation, Feedback, Action Item, Skill Gap).",
                    },
                    "content": {
                        "type": "STRING",
                        "description": "The content of the note to be recorded.",
                    },
                },
                "required": ["category", "content"],
            }),
        }
    }

    fn call(&self, args: &Map<String, Value>) -> Result<Value, VoiceError> {
        let field = |name: &str| {
            args.get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| VoiceError::InvalidToolArguments {
                    action: RECORD_NOTE_TOOL.to_string(),
                    reason: format!("missing required argument '{}'", name),
                })
        };

        let note = RecordedNote {
            category: field("category")?,
            content: field("content")?,
            recorded_at: Utc::now(),
        };

        info!("Note recorded [{}]: {}", note.category, note.content);
        self.notes.append(note);

        Ok(json!({ "result": "Note recorded successfully." }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolInvocation, ToolRegistry};

    fn registry() -> (ToolRegistry, NoteBook) {
        let notes = NoteBook::default();
        let mut registry = ToolRegistry::new();
        registry.register(RecordNoteTool::new(notes.clone()));
        (registry, notes)
    }

    #[test]
    fn test_records_note() {
        let (registry, notes) = registry();
        let responses = registry.dispatch(vec![ToolInvocation {
            id: "call-7".to_string(),
            name: RECORD_NOTE_TOOL.to_string(),
            args: json!({ "category": "Salary Expectation", "content": "$95k" })
                .as_object()
                .cloned()
                .unwrap(),
        }]);

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].id, "call-7");
        assert_eq!(
            responses[0].response,
            json!({ "result": "Note recorded successfully." })
        );

        let recorded = notes.snapshot();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].category, "Salary Expectation");
        assert_eq!(recorded[0].content, "$95k");
    }

    #[test]
    fn test_invalid_arguments_leave_notes_untouched() {
        let (registry, notes) = registry();
        let responses = registry.dispatch(vec![ToolInvocation {
            id: "call-8".to_string(),
            name: RECORD_NOTE_TOOL.to_string(),
            args: json!({ "category": "Feedback" }).as_object().cloned().unwrap(),
        }]);

        assert!(responses[0].is_failure());
        assert!(notes.is_empty());
    }

    #[test]
    fn test_notebook_clear() {
        let notes = NoteBook::default();
        notes.append(RecordedNote {
            category: "Action Item".into(),
            content: "Send take-home".into(),
            recorded_at: Utc::now(),
        });
        assert_eq!(notes.len(), 1);
        notes.clear();
        assert!(notes.is_empty());
    }
}
