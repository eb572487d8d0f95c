//! Core types, message aggregation, turn tracking, errors and config for Parley.

pub mod aggregate;
pub mod config;
pub mod content;
pub mod error;
pub mod turn;

pub use aggregate::{DeferredAggregator, EagerAggregator, Entry, IdentityAdapter, MessageAdapter, MessageGroup};
pub use content::{ContentItem, Message, Role, ToolCall, ToolResult};
pub use error::{ParleyError, Result};
pub use turn::{Dialogue, Reply, Request, RevisionPolicy, Turn, TurnState};
