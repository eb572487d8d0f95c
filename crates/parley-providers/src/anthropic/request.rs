//! Anthropic Messages API request bodies.

use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use parley_core::config::{CachePolicy, Config, DEFAULT_MODEL};

/// Sampling parameters for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnthropicParams {
    pub model_id: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
}

impl Default for AnthropicParams {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL.to_string(),
            max_tokens: 1024,
            temperature: 0.8,
            top_p: 0.9,
            top_k: 50,
        }
    }
}

impl AnthropicParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model_id: config.model_id(),
            max_tokens: config.max_tokens(),
            temperature: config.temperature(),
            top_p: config.top_p(),
            top_k: config.top_k(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub messages: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub system: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub stream: bool,
}

/// Assembles a streaming request from wire messages produced with
/// [`AnthropicAdapter`](crate::wire::AnthropicAdapter).
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    params: AnthropicParams,
    system: Vec<Value>,
    history: Vec<Value>,
    tools: Vec<Value>,
    cache_policy: CachePolicy,
}

impl RequestBuilder {
    pub fn new(params: AnthropicParams) -> Self {
        Self {
            params,
            system: Vec::new(),
            history: Vec::new(),
            tools: Vec::new(),
            cache_policy: CachePolicy::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(AnthropicParams::from_config(config)).cache_policy(config.cache_policy())
    }

    /// Append a system prompt block.
    pub fn system(mut self, text: impl Into<String>) -> Self {
        self.system.push(json!({ "type": "text", "text": text.into() }));
        self
    }

    /// Append wire messages. Messages with the `system` role are hoisted
    /// into the system blocks; the API rejects them inline.
    pub fn history(mut self, messages: impl IntoIterator<Item = Value>) -> Self {
        for message in messages {
            if message.get("role").and_then(Value::as_str) == Some("system") {
                match message.get("content") {
                    Some(Value::Array(blocks)) => self.system.extend(blocks.iter().cloned()),
                    Some(Value::String(text)) => {
                        self.system.push(json!({ "type": "text", "text": text }))
                    }
                    _ => debug!("Dropping system message without content"),
                }
            } else {
                self.history.push(message);
            }
        }
        self
    }

    /// Tool definitions, already in Anthropic schema form.
    pub fn tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = tools;
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn build(self) -> AnthropicRequest {
        let Self {
            params,
            mut system,
            mut history,
            tools,
            cache_policy,
        } = self;

        if cache_policy == CachePolicy::LastMessage {
            if let Some(block) = system.last_mut() {
                mark_ephemeral(block);
            }
            if let Some(message) = history.last_mut() {
                mark_last_block(message);
            }
        }

        AnthropicRequest {
            model: params.model_id,
            messages: history,
            system,
            tools,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            stream: true,
        }
    }
}

fn mark_ephemeral(block: &mut Value) {
    if let Some(obj) = block.as_object_mut() {
        obj.insert("cache_control".into(), json!({ "type": "ephemeral" }));
    }
}

/// Cache markers live on content blocks, so string content is expanded into
/// a single text block first.
fn mark_last_block(message: &mut Value) {
    let Some(content) = message.get_mut("content") else {
        return;
    };
    if let Value::String(text) = content {
        let text = std::mem::take(text);
        *content = json!([{ "type": "text", "text": text }]);
    }
    if let Some(block) = content.as_array_mut().and_then(|blocks| blocks.last_mut()) {
        mark_ephemeral(block);
    }
}

#[cfg(test)]
mod tests {
    use parley_core::config::{CacheConfig, ParamsConfig};
    use parley_core::{ContentItem, EagerAggregator, Role};

    use super::*;
    use crate::wire::AnthropicAdapter;

    fn history() -> Vec<Value> {
        let mut agg = EagerAggregator::with_adapter(AnthropicAdapter);
        agg.add(Role::System, ContentItem::text("You are terse.")).unwrap();
        agg.add(Role::User, ContentItem::text("hi")).unwrap();
        agg.add(Role::Assistant, ContentItem::text("hello")).unwrap();
        agg.add(Role::User, ContentItem::text("bye")).unwrap();
        agg.into_wire()
    }

    #[test]
    fn test_params_from_config() {
        let config = Config {
            params: Some(ParamsConfig {
                top_k: Some(5),
                ..Default::default()
            }),
            ..Default::default()
        };
        let params = AnthropicParams::from_config(&config);
        assert_eq!(params.top_k, 5);
        assert_eq!(params.model_id, DEFAULT_MODEL);
        assert_eq!(params.max_tokens, AnthropicParams::default().max_tokens);
    }

    #[test]
    fn test_build_hoists_system_and_marks_cache() {
        let request = RequestBuilder::new(AnthropicParams::default())
            .system("Base prompt.")
            .history(history())
            .build();

        assert!(request.stream);
        assert_eq!(request.system.len(), 2);
        assert_eq!(request.system[1]["text"], "You are terse.");
        assert_eq!(request.system[1]["cache_control"]["type"], "ephemeral");
        assert!(request.system[0].get("cache_control").is_none());

        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[0]["role"], "user");
        assert_eq!(request.messages[2]["content"][0]["cache_control"]["type"], "ephemeral");
        assert!(request.messages[0]["content"][0].get("cache_control").is_none());
    }

    #[test]
    fn test_cache_policy_none() {
        let config = Config {
            cache: Some(CacheConfig {
                policy: CachePolicy::None,
            }),
            ..Default::default()
        };
        let request = RequestBuilder::from_config(&config).history(history()).build();
        let body = serde_json::to_string(&request).unwrap();
        assert!(!body.contains("cache_control"));
    }

    #[test]
    fn test_string_content_expanded_for_marker() {
        let request = RequestBuilder::new(AnthropicParams::default())
            .history(vec![json!({"role": "user", "content": "plain"})])
            .build();
        assert_eq!(
            request.messages[0]["content"],
            json!([{"type": "text", "text": "plain", "cache_control": {"type": "ephemeral"}}])
        );
    }

    #[test]
    fn test_empty_sections_are_omitted() {
        let request = RequestBuilder::new(AnthropicParams::default()).build();
        let body = serde_json::to_value(&request).unwrap();
        assert!(body.get("system").is_none());
        assert!(body.get("tools").is_none());
        assert_eq!(body["stream"], true);
        assert_eq!(body["top_k"], 50);
    }
}
