use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{info, warn};

use super::{ToolDeclaration, ToolHandler, ToolInvocation, ToolResponse};
use crate::error::VoiceError;

/// Registered tool handlers, keyed by action name
pub struct ToolRegistry {
    tools: HashMap<String, (ToolDeclaration, Box<dyn ToolHandler>)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry {
            tools: HashMap::new(),
        }
    }

    /// Register a handler under its declared name, replacing any previous one
    pub fn register(&mut self, handler: impl ToolHandler + 'static) {
        let declaration = handler.declaration();
        let name = declaration.name.clone();
        if self.tools.contains_key(&name) {
            warn!("Tool '{}' registered twice, replacing", name);
        }
        self.tools.insert(name, (declaration, Box::new(handler)));
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All declarations, sorted by name
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        let mut declarations: Vec<_> = self.tools.values().map(|(d, _)| d.clone()).collect();
        declarations.sort_by(|a, b| a.name.cmp(&b.name));
        declarations
    }

    /// Answer a batch of invocations, one response per invocation, in order
    pub fn dispatch(&self, invocations: Vec<ToolInvocation>) -> Vec<ToolResponse> {
        invocations
            .into_iter()
            .map(|invocation| match self.call(&invocation) {
                Ok(payload) => {
                    info!("Tool '{}' ({}) succeeded", invocation.name, invocation.id);
                    ToolResponse::success(invocation, payload)
                }
                Err(e) => {
                    warn!("Tool '{}' ({}) failed: {}", invocation.name, invocation.id, e);
                    ToolResponse::failure(invocation, &e)
                }
            })
            .collect()
    }

    fn call(&self, invocation: &ToolInvocation) -> Result<Value, VoiceError> {
        let (declaration, handler) = self
            .tools
            .get(&invocation.name)
            .ok_or_else(|| VoiceError::UnsupportedToolAction(invocation.name.clone()))?;

        validate_arguments(declaration, &invocation.args)?;
        handler.call(&invocation.args)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check required arguments are present and string-typed where declared
pub fn validate_arguments(
    declaration: &ToolDeclaration,
    args: &Map<String, Value>,
) -> Result<(), VoiceError> {
    let invalid = |reason: String| VoiceError::InvalidToolArguments {
        action: declaration.name.clone(),
        reason,
    };

    for name in declaration.required() {
        let value = match args.get(name) {
            None | Some(Value::Null) => {
                return Err(invalid(format!("missing required argument '{}'", name)))
            }
            Some(value) => value,
        };

        let wants_string = declaration
            .property_type(name)
            .is_some_and(|t| t.eq_ignore_ascii_case("string"));

        if wants_string && !value.is_string() {
            return Err(invalid(format!("argument '{}' must be a string", name)));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    impl ToolHandler for Echo {
        fn declaration(&self) -> ToolDeclaration {
            ToolDeclaration {
                name: "echo".to_string(),
                description: "Echo the text back".to_string(),
                parameters: json!({
                    "type": "OBJECT",
                    "properties": { "text": { "type": "STRING" } },
                    "required": ["text"],
                }),
            }
        }

        fn call(&self, args: &Map<String, Value>) -> Result<Value, VoiceError> {
            Ok(json!({ "result": args["text"] }))
        }
    }

    fn invocation(id: &str, name: &str, args: Value) -> ToolInvocation {
        ToolInvocation {
            id: id.to_string(),
            name: name.to_string(),
            args: args.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_register_and_declare() {
        let mut registry = ToolRegistry::new();
        registry.register(Echo);
        assert!(registry.has_tool("echo"));
        assert_eq!(registry.declarations()[0].required(), vec!["text"]);
    }

    #[test]
    fn test_unknown_action_gets_one_failure() {
        let registry = ToolRegistry::new();
        let responses = registry.dispatch(vec![invocation("c1", "launch", json!({}))]);

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].id, "c1");
        assert_eq!(responses[0].name, "launch");
        assert_eq!(responses[0].response["error"]["code"], "unsupported_action");
    }

    #[test]
    fn test_missing_argument() {
        let mut registry = ToolRegistry::new();
        registry.register(Echo);
        let responses = registry.dispatch(vec![invocation("c2", "echo", json!({}))]);

        assert!(responses[0].is_failure());
        assert_eq!(responses[0].response["error"]["code"], "invalid_arguments");
    }

    #[test]
    fn test_wrong_type_and_null() {
        let mut registry = ToolRegistry::new();
        registry.register(Echo);
        let responses = registry.dispatch(vec![
            invocation("a", "echo", json!({ "text": 5 })),
            invocation("b", "echo", json!({ "text": null })),
        ]);

        assert!(responses.iter().all(ToolResponse::is_failure));
    }

    #[test]
    fn test_batch_preserves_order_and_ids() {
        let mut registry = ToolRegistry::new();
        registry.register(Echo);
        let responses = registry.dispatch(vec![
            invocation("1", "echo", json!({ "text": "hi" })),
            invocation("2", "nope", json!({})),
            invocation("3", "echo", json!({ "text": "there" })),
        ]);

        let ids: Vec<_> = responses.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(responses[0].response, json!({ "result": "hi" }));
        assert!(responses[1].is_failure());
        assert!(!responses[2].is_failure());
    }

    /// Succeeds with a payload that happens to carry an `error` field
    struct Lookup;

    impl ToolHandler for Lookup {
        fn declaration(&self) -> ToolDeclaration {
            ToolDeclaration {
                name: "lookup".to_string(),
                description: "Look up a term".to_string(),
                parameters: json!({ "type": "OBJECT", "properties": {} }),
            }
        }

        fn call(&self, _args: &Map<String, Value>) -> Result<Value, VoiceError> {
            Ok(json!({ "matches": 0, "error": "no entry for that term" }))
        }
    }

    #[test]
    fn test_success_payload_with_error_field_is_not_a_failure() {
        let mut registry = ToolRegistry::new();
        registry.register(Lookup);
        let responses = registry.dispatch(vec![invocation("l1", "lookup", json!({}))]);

        assert!(!responses[0].is_failure());
        assert_eq!(responses[0].response["matches"], 0);
    }

    #[test]
    fn test_empty_batch() {
        assert!(ToolRegistry::new().dispatch(vec![]).is_empty());
    }
}
