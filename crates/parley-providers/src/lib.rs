//! Backend-facing half of Parley.
//!
//! Backends stream their responses as provider-specific events. This crate
//! turns those into the uniform [`StreamEvent`] sequence, and projects
//! aggregated messages into each provider's wire shape.

use serde::{Deserialize, Serialize};

use parley_core::ToolCall;

pub mod anthropic;
pub mod sse;
pub mod stream;
pub mod wire;

pub use anthropic::translate::StreamTranslator;
pub use stream::{translate, TranslatedStream};

/// Token counters reported over the life of one response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
}

/// Backend-agnostic event produced while a response streams in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// The response has begun.
    Start,
    /// A non-empty piece of assistant text.
    TextDelta { text: String },
    /// A complete tool invocation with its parsed arguments.
    ToolCall(ToolCall),
    /// Generation finished for the given reason.
    Stop { reason: Option<String> },
    /// Final usage counters, emitted once, after `Stop`.
    Metadata(Usage),
}

impl StreamEvent {
    pub fn text_delta(text: impl Into<String>) -> Self {
        StreamEvent::TextDelta { text: text.into() }
    }

    pub fn as_text_delta(&self) -> Option<&str> {
        match self {
            StreamEvent::TextDelta { text } => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCall> {
        match self {
            StreamEvent::ToolCall(call) => Some(call),
            _ => None,
        }
    }
}
