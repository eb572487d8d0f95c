//! Content model: roles, content items and messages.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ParleyError;

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParleyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(ParleyError::UnsupportedRole(other.to_string())),
        }
    }
}

/// A tool invocation requested by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: Map<String, Value>,
}

/// The answer to a [`ToolCall`], matched by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// Atomic unit of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentItem {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_call")]
    ToolCall(ToolCall),
    #[serde(rename = "tool_result")]
    ToolResult(ToolResult),
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        ContentItem::Text { text: text.into() }
    }

    /// Name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            ContentItem::Text { .. } => "text",
            ContentItem::ToolCall(_) => "tool_call",
            ContentItem::ToolResult(_) => "tool_result",
        }
    }

    /// Blank text contributes nothing. Tool items are never empty.
    pub fn is_empty(&self) -> bool {
        match self {
            ContentItem::Text { text } => text.trim().is_empty(),
            ContentItem::ToolCall(_) | ContentItem::ToolResult(_) => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentItem::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCall> {
        match self {
            ContentItem::ToolCall(call) => Some(call),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResult> {
        match self {
            ContentItem::ToolResult(result) => Some(result),
            _ => None,
        }
    }
}

impl From<ToolCall> for ContentItem {
    fn from(call: ToolCall) -> Self {
        ContentItem::ToolCall(call)
    }
}

impl From<ToolResult> for ContentItem {
    fn from(result: ToolResult) -> Self {
        ContentItem::ToolResult(result)
    }
}

/// A role-tagged run of content items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentItem>,
}

impl Message {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            content: Vec::new(),
        }
    }

    pub fn user() -> Self {
        Self::new(Role::User)
    }

    pub fn assistant() -> Self {
        Self::new(Role::Assistant)
    }

    pub fn with_content(mut self, item: impl Into<ContentItem>) -> Self {
        self.content.push(item.into());
        self
    }

    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_content(ContentItem::text(text))
    }
}

/// Ids of tool results that do not answer an earlier tool call.
///
/// Not enforced anywhere; callers use it to catch mis-threaded ids.
pub fn unmatched_tool_results(messages: &[Message]) -> Vec<&str> {
    let mut seen = HashSet::new();
    let mut unmatched = Vec::new();
    for item in messages.iter().flat_map(|m| m.content.iter()) {
        match item {
            ContentItem::ToolCall(call) => {
                seen.insert(call.id.as_str());
            }
            ContentItem::ToolResult(result) if !seen.contains(result.id.as_str()) => {
                unmatched.push(result.id.as_str());
            }
            _ => {}
        }
    }
    unmatched
}
