//! Tools the backend may call, and the registry that dispatches them.
//!
//! Each tool implements the [`Tool`] trait. A [`ToolRegistry`] resolves
//! [`ToolCall`]s by name and always answers with a [`ToolResult`] carrying
//! the call's id, so every call in a transcript has a matching result.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use parley_core::{ToolCall, ToolResult};

pub mod schema;

pub use schema::ToolSchema;

/// The core tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name as exposed to the backend (e.g. "get_weather").
    fn name(&self) -> &str;

    /// Human-readable description for the backend.
    fn description(&self) -> &str;

    /// JSON Schema describing the tool's input object.
    fn input_schema(&self) -> Value;

    /// Run the tool synchronously.
    fn call(&self, call: &ToolCall) -> anyhow::Result<ToolResult>;

    /// Run the tool asynchronously. Defaults to [`call`](Tool::call).
    async fn async_call(&self, call: &ToolCall) -> anyhow::Result<ToolResult> {
        self.call(call)
    }
}

/// A tool built from a name, a schema and a closure.
pub struct FnTool<F> {
    name: String,
    description: String,
    schema: Value,
    func: F,
}

impl<F> FnTool<F>
where
    F: Fn(&ToolCall) -> anyhow::Result<String> + Send + Sync,
{
    pub fn new(name: impl Into<String>, description: impl Into<String>, schema: Value, func: F) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            func,
        }
    }
}

#[async_trait]
impl<F> Tool for FnTool<F>
where
    F: Fn(&ToolCall) -> anyhow::Result<String> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        self.schema.clone()
    }

    fn call(&self, call: &ToolCall) -> anyhow::Result<ToolResult> {
        let content = (self.func)(call)?;
        Ok(ToolResult::ok(&call.id, content))
    }
}

/// Registry of available tools.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let tool: Arc<dyn Tool> = Arc::new(tool);
        if let Some(slot) = self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            warn!(tool = tool.name(), "Replacing already registered tool");
            *slot = tool;
        } else {
            self.tools.push(tool);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run the named tool asynchronously.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.get(&call.name) else {
            return unknown_tool(call);
        };
        debug!(tool = %call.name, id = %call.id, "Dispatching tool call");
        answer(call, tool.async_call(call).await)
    }

    /// Run the named tool on the calling thread.
    pub fn dispatch_blocking(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.get(&call.name) else {
            return unknown_tool(call);
        };
        debug!(tool = %call.name, id = %call.id, "Dispatching tool call");
        answer(call, tool.call(call))
    }

    /// Tool definitions for a request body, in registration order.
    pub fn schemas(&self, schema: ToolSchema) -> Vec<Value> {
        self.tools.iter().map(|t| schema.marshal(t.as_ref())).collect()
    }
}

fn unknown_tool(call: &ToolCall) -> ToolResult {
    warn!(tool = %call.name, id = %call.id, "Call for unknown tool");
    ToolResult::error(&call.id, format!("Unknown tool: {}", call.name))
}

/// Turn a tool outcome into the result that answers `call`.
fn answer(call: &ToolCall, outcome: anyhow::Result<ToolResult>) -> ToolResult {
    match outcome {
        Ok(mut result) => {
            if result.id != call.id {
                debug!(expected = %call.id, got = %result.id, "Tool result id rewritten to match call");
                result.id.clone_from(&call.id);
            }
            result
        }
        Err(e) => {
            warn!(tool = %call.name, id = %call.id, error = %e, "Tool call failed");
            ToolResult::error(&call.id, format!("Tool error: {e:#}"))
        }
    }
}
