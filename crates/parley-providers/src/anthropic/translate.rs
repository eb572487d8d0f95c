//! Translation of raw Anthropic events into [`StreamEvent`]s.
//!
//! One [`StreamTranslator`] serves one response. Tool calls are held back
//! until their argument JSON is complete; usage counters collected from
//! `message_start` and `message_delta` are reported together after `Stop`.

use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use parley_core::{ParleyError, Result, ToolCall};

use super::events::{BlockDelta, ContentBlock, RawEvent};
use crate::{StreamEvent, Usage};

/// Tool-use block whose arguments are still arriving.
#[derive(Debug)]
struct PendingTool {
    id: String,
    name: String,
    json: String,
}

impl PendingTool {
    fn finish(self) -> ToolCall {
        ToolCall {
            input: parse_tool_input(&self.id, &self.json),
            id: self.id,
            name: self.name,
        }
    }
}

/// Parse accumulated argument JSON. Anything other than an object becomes an
/// empty map so one bad payload cannot sink the response.
fn parse_tool_input(tool_id: &str, json: &str) -> Map<String, Value> {
    if json.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(json) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(tool_id, kind = %json_kind(&other), "Tool input is not an object, using empty input");
            Map::new()
        }
        Err(e) => {
            warn!(tool_id, %e, "Malformed tool input JSON, using empty input");
            Map::new()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Default)]
pub struct StreamTranslator {
    pending: Option<PendingTool>,
    usage: Usage,
    started: bool,
    stopped: bool,
}

impl StreamTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one raw event, returning the normalized events it produces
    /// (zero, one or two).
    ///
    /// A backend `error` event is returned as [`ParleyError::Backend`].
    pub fn translate(&mut self, event: RawEvent) -> Result<Vec<StreamEvent>> {
        trace!(?event, "Anthropic stream event");
        let mut out = Vec::new();

        match event {
            RawEvent::MessageStart { message } => {
                let usage = message.usage;
                self.usage.cache_read_tokens = usage.cache_read_input_tokens;
                self.usage.cache_write_tokens = usage.cache_creation_input_tokens;
                self.usage.input_tokens = usage.input_tokens;
                self.ensure_started(&mut out);
            }
            RawEvent::ContentBlockStart { content_block, .. } => {
                if let ContentBlock::ToolUse { id, name } = content_block {
                    self.ensure_started(&mut out);
                    if let Some(dropped) = self.pending.replace(PendingTool {
                        id,
                        name,
                        json: String::new(),
                    }) {
                        warn!(tool_id = %dropped.id, "Tool block never closed, discarding it");
                    }
                }
            }
            RawEvent::ContentBlockDelta { delta, .. } => match delta {
                BlockDelta::TextDelta { text } => {
                    if !text.is_empty() {
                        self.ensure_started(&mut out);
                        out.push(StreamEvent::TextDelta { text });
                    }
                }
                BlockDelta::InputJsonDelta { partial_json } => match self.pending.as_mut() {
                    Some(tool) => tool.json.push_str(&partial_json),
                    None => debug!("Argument fragment outside a tool block, ignoring"),
                },
                BlockDelta::Other => {}
            },
            RawEvent::ContentBlockStop { .. } => {
                if let Some(tool) = self.pending.take() {
                    out.push(StreamEvent::ToolCall(tool.finish()));
                }
            }
            RawEvent::MessageDelta { delta, usage } => {
                if self.stopped {
                    warn!(stop_reason = ?delta.stop_reason, "Duplicate message_delta after stop, ignoring");
                    return Ok(out);
                }
                self.ensure_started(&mut out);
                out.push(StreamEvent::Stop {
                    reason: delta.stop_reason,
                });
                if usage.output_tokens.is_some() {
                    self.usage.output_tokens = usage.output_tokens;
                }
                self.stopped = true;
                out.push(StreamEvent::Metadata(self.usage.clone()));
            }
            RawEvent::Error { error } => {
                return Err(ParleyError::Backend {
                    kind: error.kind,
                    message: error.message,
                });
            }
            RawEvent::MessageStop | RawEvent::Ping | RawEvent::Unknown => {}
        }

        Ok(out)
    }

    /// Whether the response has been finalized with `Stop`.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Call once the event source is exhausted.
    pub fn finish(&self) -> Result<()> {
        if self.stopped {
            Ok(())
        } else {
            Err(ParleyError::IncompleteStream)
        }
    }

    /// Translate a complete, already-buffered event sequence.
    pub fn translate_all<I>(events: I) -> Result<Vec<StreamEvent>>
    where
        I: IntoIterator<Item = RawEvent>,
    {
        let mut translator = Self::new();
        let mut out = Vec::new();
        for event in events {
            out.extend(translator.translate(event)?);
        }
        translator.finish()?;
        Ok(out)
    }

    /// `Start` must lead the sequence even if the backend skipped
    /// `message_start`.
    fn ensure_started(&mut self, out: &mut Vec<StreamEvent>) {
        if !self.started {
            self.started = true;
            out.push(StreamEvent::Start);
        }
    }
}
