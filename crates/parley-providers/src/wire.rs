//! Wire projections of aggregated messages.
//!
//! Both adapters plug into the aggregators as a [`MessageAdapter`]:
//!
//! ```ignore
//! let mut aggregator = EagerAggregator::with_adapter(AnthropicAdapter);
//! aggregator.add(Role::User, ContentItem::text("hi"))?;
//! let body = aggregator.wire();
//! ```

use serde_json::{Map, Value, json};

use parley_core::{ContentItem, Message, MessageAdapter, ParleyError, Result, Role, ToolCall, ToolResult};

/// Anthropic Messages API shape: one JSON message per logical message.
///
/// Tool results travel as a `user` message of `tool_result` blocks. System
/// messages keep the `system` role so the request builder can hoist them.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicAdapter;

impl MessageAdapter for AnthropicAdapter {
    type Wire = Value;

    fn adapt(&self, message: &Message) -> Value {
        let role = match message.role {
            Role::Tool => "user",
            other => other.as_str(),
        };
        let content: Vec<Value> = message.content.iter().map(anthropic_block).collect();
        json!({ "role": role, "content": content })
    }

    /// A `user` message made only of `tool_result` blocks comes back as a
    /// tool message. String content is read as a single text block.
    fn to_message(&self, wire: &Value) -> Result<Message> {
        let role: Role = str_field(wire, "role")?.parse()?;
        let content = match wire.get("content") {
            Some(Value::String(text)) => vec![ContentItem::text(text.as_str())],
            Some(Value::Array(blocks)) => blocks.iter().map(anthropic_item).collect::<Result<Vec<_>>>()?,
            _ => return Err(malformed("content must be a string or a list of blocks")),
        };
        let only_results =
            !content.is_empty() && content.iter().all(|item| item.as_tool_result().is_some());
        let role = if role == Role::User && only_results { Role::Tool } else { role };
        Ok(Message { role, content })
    }
}

fn anthropic_block(item: &ContentItem) -> Value {
    match item {
        ContentItem::Text { text } => json!({ "type": "text", "text": text }),
        ContentItem::ToolCall(call) => json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": call.input,
        }),
        ContentItem::ToolResult(result) => {
            let mut block = json!({
                "type": "tool_result",
                "tool_use_id": result.id,
                "content": result.content,
            });
            if result.is_error {
                block["is_error"] = Value::Bool(true);
            }
            block
        }
    }
}

fn anthropic_item(block: &Value) -> Result<ContentItem> {
    match str_field(block, "type")? {
        "text" => Ok(ContentItem::text(str_field(block, "text")?)),
        "tool_use" => Ok(ContentItem::ToolCall(ToolCall {
            id: str_field(block, "id")?.to_string(),
            name: str_field(block, "name")?.to_string(),
            input: match block.get("input") {
                Some(Value::Object(input)) => input.clone(),
                None | Some(Value::Null) => Map::new(),
                Some(_) => return Err(malformed("tool_use input must be an object")),
            },
        })),
        "tool_result" => Ok(ContentItem::ToolResult(ToolResult {
            id: str_field(block, "tool_use_id")?.to_string(),
            content: result_text(block.get("content"))?,
            is_error: block.get("is_error").and_then(Value::as_bool).unwrap_or(false),
        })),
        other => Err(malformed(format!("unknown block type `{other}`"))),
    }
}

/// Tool result content is either a string or a list of text blocks.
fn result_text(content: Option<&Value>) -> Result<String> {
    match content {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(text)) => Ok(text.clone()),
        Some(Value::Array(blocks)) => {
            let texts = blocks
                .iter()
                .map(|block| str_field(block, "text"))
                .collect::<Result<Vec<_>>>()?;
            Ok(texts.join("\n"))
        }
        Some(_) => Err(malformed("tool_result content must be a string or a list of blocks")),
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Result<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(format!("missing string field `{key}`")))
}

fn malformed(reason: impl Into<String>) -> ParleyError {
    ParleyError::MalformedWire(reason.into())
}

/// OpenAI Chat Completions shape.
///
/// One logical tool message fans out into one `tool` message per result, so
/// each message projects to a list. Use [`flatten`] to get the request body.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiAdapter;

impl MessageAdapter for OpenAiAdapter {
    type Wire = Vec<Value>;

    fn adapt(&self, message: &Message) -> Vec<Value> {
        match message.role {
            Role::Tool => message
                .content
                .iter()
                .filter_map(ContentItem::as_tool_result)
                .map(openai_tool_message)
                .collect(),
            Role::Assistant => {
                let text = joined_text(message);
                let tool_calls: Vec<Value> = message
                    .content
                    .iter()
                    .filter_map(ContentItem::as_tool_call)
                    .map(openai_tool_call)
                    .collect();

                let mut msg = json!({ "role": "assistant" });
                msg["content"] = if text.is_empty() && !tool_calls.is_empty() {
                    Value::Null
                } else {
                    Value::String(text)
                };
                if !tool_calls.is_empty() {
                    msg["tool_calls"] = Value::Array(tool_calls);
                }
                vec![msg]
            }
            Role::User | Role::System => {
                vec![json!({ "role": message.role.as_str(), "content": joined_text(message) })]
            }
        }
    }

    /// Reads back what [`adapt`](MessageAdapter::adapt) produces: either a
    /// run of `tool` messages or a single message of another role.
    fn to_message(&self, wire: &Vec<Value>) -> Result<Message> {
        let Some(first) = wire.first() else {
            return Err(malformed("empty message list"));
        };
        let role: Role = str_field(first, "role")?.parse()?;
        if role == Role::Tool {
            let content = wire
                .iter()
                .map(|msg| -> Result<ContentItem> {
                    match str_field(msg, "role")? {
                        "tool" => Ok(ContentItem::ToolResult(ToolResult::ok(
                            str_field(msg, "tool_call_id")?,
                            msg.get("content").and_then(Value::as_str).unwrap_or_default(),
                        ))),
                        other => Err(malformed(format!("`{other}` message among tool results"))),
                    }
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(Message { role, content });
        }
        if wire.len() > 1 {
            return Err(malformed("only tool results fan out into several messages"));
        }

        let mut message = Message::new(role);
        match first.get("content") {
            None | Some(Value::Null) => {}
            Some(Value::String(text)) if text.is_empty() => {}
            Some(Value::String(text)) => message.content.push(ContentItem::text(text.as_str())),
            Some(_) => return Err(malformed("content must be a string")),
        }
        if let Some(calls) = first.get("tool_calls") {
            let calls = calls
                .as_array()
                .ok_or_else(|| malformed("tool_calls must be a list"))?;
            for call in calls {
                message.content.push(ContentItem::ToolCall(openai_call_item(call)?));
            }
        }
        Ok(message)
    }
}

fn openai_call_item(call: &Value) -> Result<ToolCall> {
    let function = call
        .get("function")
        .ok_or_else(|| malformed("tool call without a function"))?;
    let arguments = function.get("arguments").and_then(Value::as_str).unwrap_or_default();
    let input = if arguments.trim().is_empty() {
        Map::new()
    } else {
        serde_json::from_str(arguments)
            .map_err(|e| malformed(format!("tool call arguments: {e}")))?
    };
    Ok(ToolCall {
        id: str_field(call, "id")?.to_string(),
        name: str_field(function, "name")?.to_string(),
        input,
    })
}

fn joined_text(message: &Message) -> String {
    message
        .content
        .iter()
        .filter_map(ContentItem::as_text)
        .collect::<Vec<_>>()
        .join("\n")
}

fn openai_tool_call(call: &ToolCall) -> Value {
    json!({
        "id": call.id,
        "type": "function",
        "function": {
            "name": call.name,
            "arguments": Value::Object(call.input.clone()).to_string(),
        }
    })
}

fn openai_tool_message(result: &ToolResult) -> Value {
    json!({
        "role": "tool",
        "tool_call_id": result.id,
        "content": result.content,
    })
}

/// Concatenate per-message OpenAI projections into one message list.
pub fn flatten(wire: impl IntoIterator<Item = Vec<Value>>) -> Vec<Value> {
    wire.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use parley_core::{DeferredAggregator, EagerAggregator};
    use serde_json::Map;

    use super::*;

    fn call(id: &str, name: &str, input: Value) -> ToolCall {
        let Value::Object(input) = input else {
            panic!("tool input must be an object");
        };
        ToolCall {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    #[test]
    fn test_anthropic_tool_round() {
        let mut agg = EagerAggregator::with_adapter(AnthropicAdapter);
        agg.add(Role::User, ContentItem::text("weather?")).unwrap();
        agg.add(Role::Assistant, ContentItem::text("Checking.")).unwrap();
        agg.add(Role::Assistant, call("t1", "weather", json!({"city": "Oslo"})).into())
            .unwrap();
        agg.add(Role::Tool, ToolResult::ok("t1", "rain").into()).unwrap();
        agg.add(Role::Tool, ToolResult::error("t2", "boom").into()).unwrap();

        let wire = agg.wire();
        assert_eq!(wire.len(), 3);
        assert_eq!(
            wire[1],
            json!({
                "role": "assistant",
                "content": [
                    {"type": "text", "text": "Checking."},
                    {"type": "tool_use", "id": "t1", "name": "weather", "input": {"city": "Oslo"}}
                ]
            })
        );
        assert_eq!(wire[2]["role"], "user");
        assert_eq!(wire[2]["content"][0]["tool_use_id"], "t1");
        assert!(wire[2]["content"][0].get("is_error").is_none());
        assert_eq!(wire[2]["content"][1]["is_error"], true);
    }

    #[test]
    fn test_openai_tool_round() {
        let mut agg = DeferredAggregator::with_adapter(OpenAiAdapter);
        agg.add(Role::System, ContentItem::text("Be brief.")).unwrap();
        agg.add(Role::User, ContentItem::text("add")).unwrap();
        agg.add(Role::Assistant, call("c1", "sum", json!({"a": 1, "b": 2})).into())
            .unwrap();
        agg.add(Role::Tool, ToolResult::ok("c1", "3").into()).unwrap();
        agg.add(Role::Tool, ToolResult::ok("c2", "4").into()).unwrap();

        let messages = flatten(agg.materialize());
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0], json!({"role": "system", "content": "Be brief."}));
        assert_eq!(messages[2]["content"], Value::Null);
        let arguments = messages[2]["tool_calls"][0]["function"]["arguments"]
            .as_str()
            .unwrap();
        let parsed: Map<String, Value> = serde_json::from_str(arguments).unwrap();
        assert_eq!(parsed["b"], json!(2));
        assert_eq!(messages[3], json!({"role": "tool", "tool_call_id": "c1", "content": "3"}));
        assert_eq!(messages[4]["tool_call_id"], "c2");
    }

    #[test]
    fn test_anthropic_history_reloads() {
        let mut agg = DeferredAggregator::with_adapter(AnthropicAdapter);
        agg.add(Role::User, ContentItem::text("weather?")).unwrap();
        agg.add(Role::Assistant, ContentItem::text("Checking.")).unwrap();
        agg.add(Role::Assistant, call("t1", "weather", json!({"city": "Oslo"})).into())
            .unwrap();
        agg.add(Role::Tool, ToolResult::error("t1", "boom").into()).unwrap();
        let original = agg.groups();

        let mut reloaded = DeferredAggregator::with_adapter(AnthropicAdapter);
        for wire in agg.materialize() {
            reloaded.add_wire(&wire).unwrap();
        }
        assert_eq!(reloaded.groups(), original);
        assert_eq!(reloaded.materialize(), agg.materialize());
    }

    #[test]
    fn test_anthropic_reads_string_content() {
        let message = AnthropicAdapter
            .to_message(&json!({"role": "user", "content": "hello"}))
            .unwrap();
        assert_eq!(message, Message::user().with_text("hello"));

        let result = AnthropicAdapter
            .to_message(&json!({"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "t1", "content": [{"type": "text", "text": "rain"}]}
            ]}))
            .unwrap();
        assert_eq!(result.role, Role::Tool);
        assert_eq!(result.content, vec![ToolResult::ok("t1", "rain").into()]);
    }

    #[test]
    fn test_anthropic_rejects_malformed_wire() {
        let no_role = AnthropicAdapter.to_message(&json!({"content": "hi"}));
        assert!(matches!(no_role, Err(ParleyError::MalformedWire(_))));
        let bad_block = AnthropicAdapter
            .to_message(&json!({"role": "assistant", "content": [{"type": "image"}]}));
        assert!(matches!(bad_block, Err(ParleyError::MalformedWire(_))));
        let bad_role = AnthropicAdapter.to_message(&json!({"role": "robot", "content": "hi"}));
        assert!(matches!(bad_role, Err(ParleyError::UnsupportedRole(_))));
    }

    #[test]
    fn test_openai_history_reloads() {
        let mut agg = EagerAggregator::with_adapter(OpenAiAdapter);
        agg.add(Role::System, ContentItem::text("Be brief.")).unwrap();
        agg.add(Role::User, ContentItem::text("add")).unwrap();
        agg.add(Role::Assistant, call("c1", "sum", json!({"a": 1, "b": 2})).into())
            .unwrap();
        agg.add(Role::Tool, ToolResult::ok("c1", "3").into()).unwrap();
        agg.add(Role::Tool, ToolResult::ok("c2", "4").into()).unwrap();
        agg.add(Role::Assistant, ContentItem::text("3 and 4")).unwrap();

        let mut reloaded = EagerAggregator::with_adapter(OpenAiAdapter);
        for wire in agg.wire() {
            reloaded.add_wire(wire).unwrap();
        }
        assert_eq!(reloaded.groups(), agg.groups());
        assert_eq!(reloaded.groups()[3].content.len(), 2);
    }

    #[test]
    fn test_openai_rejects_mixed_fan_out() {
        let wire = vec![
            json!({"role": "tool", "tool_call_id": "c1", "content": "3"}),
            json!({"role": "user", "content": "hi"}),
        ];
        assert!(matches!(OpenAiAdapter.to_message(&wire), Err(ParleyError::MalformedWire(_))));
        assert!(OpenAiAdapter.to_message(&Vec::new()).is_err());

        let bad_args = vec![json!({"role": "assistant", "content": null, "tool_calls": [
            {"id": "c1", "type": "function", "function": {"name": "sum", "arguments": "{not json"}}
        ]})];
        assert!(matches!(OpenAiAdapter.to_message(&bad_args), Err(ParleyError::MalformedWire(_))));
    }

    #[test]
    fn test_openai_plain_assistant_text() {
        let message = Message::assistant().with_text("one").with_text("two");
        let wire = OpenAiAdapter.adapt(&message);
        assert_eq!(wire, vec![json!({"role": "assistant", "content": "one\ntwo"})]);
    }
}
