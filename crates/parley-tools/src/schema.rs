//! Tool definitions in each backend's request format.

use serde_json::{Map, Value, json};

use crate::Tool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSchema {
    /// `{name, description, input_schema}`; `anyOf` is spelled `oneOf`.
    Anthropic,
    /// `{type: "function", function: {name, description, parameters}}`.
    OpenAi,
}

impl ToolSchema {
    pub fn marshal(&self, tool: &dyn Tool) -> Value {
        match self {
            ToolSchema::Anthropic => json!({
                "name": tool.name(),
                "description": tool.description(),
                "input_schema": rename_any_of(tool.input_schema()),
            }),
            ToolSchema::OpenAi => json!({
                "type": "function",
                "function": {
                    "name": tool.name(),
                    "description": tool.description(),
                    "parameters": tool.input_schema(),
                }
            }),
        }
    }
}

/// Rewrite every `anyOf` key to `oneOf`, at any depth.
fn rename_any_of(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    let key = if key == "anyOf" { "oneOf".to_string() } else { key };
                    (key, rename_any_of(value))
                })
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(rename_any_of).collect()),
        other => other,
    }
}
