//! Message aggregation: turns a feed of role-tagged content items into
//! role-alternating message groups.
//!
//! Consecutive contributions under the same role merge into one [`Message`];
//! a role switch always starts a new one. Two modes share that rule:
//!
//! - [`EagerAggregator`] mutates its group on every [`add`](EagerAggregator::add)
//!   and re-projects the last message through a [`MessageAdapter`].
//! - [`DeferredAggregator`] buffers routed items and replays the merge from
//!   scratch whenever the group is requested.

use std::ops::Deref;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::content::{unmatched_tool_results, ContentItem, Message, Role};
use crate::error::{ParleyError, Result};

/// Projects a logical [`Message`] into a backend's wire representation.
pub trait MessageAdapter {
    type Wire;

    fn adapt(&self, message: &Message) -> Self::Wire;

    /// Reverse projection, used to load history that was stored in wire
    /// form. Adapters without one reject every input.
    fn to_message(&self, wire: &Self::Wire) -> Result<Message> {
        let _ = wire;
        Err(ParleyError::MalformedWire(
            "adapter has no reverse projection".into(),
        ))
    }
}

impl<F, W> MessageAdapter for F
where
    F: Fn(&Message) -> W,
{
    type Wire = W;

    fn adapt(&self, message: &Message) -> W {
        self(message)
    }
}

/// Projects a message to a copy of itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityAdapter;

impl MessageAdapter for IdentityAdapter {
    type Wire = Message;

    fn adapt(&self, message: &Message) -> Message {
        message.clone()
    }

    fn to_message(&self, wire: &Message) -> Result<Message> {
        Ok(wire.clone())
    }
}

/// Ordered messages in which no two neighbours share a role.
///
/// Only the aggregators build these, so the alternation holds by construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MessageGroup(Vec<Message>);

impl MessageGroup {
    pub fn into_inner(self) -> Vec<Message> {
        self.0
    }

    /// Panics in debug builds if a tool result answers no earlier tool call.
    pub fn debug_assert_tool_links(&self) {
        debug_assert!(
            unmatched_tool_results(&self.0).is_empty(),
            "tool results without a matching tool call: {:?}",
            unmatched_tool_results(&self.0)
        );
    }

    /// Appends an already-routed, non-empty item. Returns true when a new
    /// message was started.
    fn push(&mut self, role: Role, item: ContentItem) -> bool {
        match self.0.last_mut() {
            Some(current) if current.role == role => {
                current.content.push(item);
                false
            }
            _ => {
                trace!(%role, "starting new message");
                self.0.push(Message {
                    role,
                    content: vec![item],
                });
                true
            }
        }
    }
}

impl Deref for MessageGroup {
    type Target = [Message];

    fn deref(&self) -> &[Message] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a MessageGroup {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Decide which role an item is filed under.
///
/// Tool calls always belong to the assistant and tool results to the tool
/// role; text keeps its declared role but may not be sent as a tool message.
pub fn route(role: Role, item: &ContentItem) -> Result<Role> {
    match item {
        ContentItem::ToolCall(_) => Ok(Role::Assistant),
        ContentItem::ToolResult(_) => Ok(Role::Tool),
        ContentItem::Text { .. } => match role {
            Role::System | Role::User | Role::Assistant => Ok(role),
            Role::Tool => Err(ParleyError::UnsupportedContentKind {
                role,
                kind: item.kind(),
            }),
        },
    }
}

/// Route every item of a message, failing before anything is applied.
fn route_message(message: Message) -> Result<Vec<(Role, ContentItem)>> {
    let role = message.role;
    message
        .content
        .into_iter()
        .map(|item| route(role, &item).map(|routed| (routed, item)))
        .collect()
}

/// Append-only aggregator that keeps a projected copy of every message.
pub struct EagerAggregator<A: MessageAdapter = IdentityAdapter> {
    group: MessageGroup,
    wire: Vec<A::Wire>,
    adapter: A,
}

impl EagerAggregator {
    pub fn new() -> Self {
        Self::with_adapter(IdentityAdapter)
    }
}

impl Default for EagerAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: MessageAdapter> EagerAggregator<A> {
    pub fn with_adapter(adapter: A) -> Self {
        Self {
            group: MessageGroup::default(),
            wire: Vec::new(),
            adapter,
        }
    }

    /// Add one item under `role`, applying the routing rules.
    pub fn add(&mut self, role: Role, item: ContentItem) -> Result<()> {
        let role = route(role, &item)?;
        self.push_routed(role, item);
        Ok(())
    }

    /// Add every item of `message`. On error nothing is added.
    pub fn add_message(&mut self, message: Message) -> Result<()> {
        for (role, item) in route_message(message)? {
            self.push_routed(role, item);
        }
        Ok(())
    }

    /// Add a message given in wire form, reversing the adapter first.
    pub fn add_wire(&mut self, wire: &A::Wire) -> Result<()> {
        let message = self.adapter.to_message(wire)?;
        self.add_message(message)
    }

    pub fn groups(&self) -> &MessageGroup {
        &self.group
    }

    /// Wire form of each message, index-aligned with [`groups`](Self::groups).
    pub fn wire(&self) -> &[A::Wire] {
        &self.wire
    }

    pub fn into_wire(self) -> Vec<A::Wire> {
        self.wire
    }

    pub fn len(&self) -> usize {
        self.group.len()
    }

    pub fn is_empty(&self) -> bool {
        self.group.is_empty()
    }

    fn push_routed(&mut self, role: Role, item: ContentItem) {
        if item.is_empty() {
            return;
        }
        let started = self.group.push(role, item);
        let Some(last) = self.group.0.last() else {
            return;
        };
        let projected = self.adapter.adapt(last);
        match self.wire.last_mut() {
            Some(slot) if !started => *slot = projected,
            _ => self.wire.push(projected),
        }
    }
}

/// A routed item waiting in a [`DeferredAggregator`] buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub role: Role,
    pub item: ContentItem,
}

/// Buffers items and rebuilds the message group on demand.
#[derive(Debug, Clone, Default)]
pub struct DeferredAggregator<A = IdentityAdapter> {
    entries: Vec<Entry>,
    adapter: A,
}

impl DeferredAggregator {
    pub fn new() -> Self {
        Self::with_adapter(IdentityAdapter)
    }
}

impl<A: MessageAdapter> DeferredAggregator<A> {
    pub fn with_adapter(adapter: A) -> Self {
        Self {
            entries: Vec::new(),
            adapter,
        }
    }

    /// Buffer one item under `role`. Routing errors surface here, not at
    /// materialization.
    pub fn add(&mut self, role: Role, item: ContentItem) -> Result<()> {
        let role = route(role, &item)?;
        self.entries.push(Entry { role, item });
        Ok(())
    }

    /// Buffer every item of `message`. On error nothing is buffered.
    pub fn add_message(&mut self, message: Message) -> Result<()> {
        let routed = route_message(message)?;
        self.entries
            .extend(routed.into_iter().map(|(role, item)| Entry { role, item }));
        Ok(())
    }

    /// Buffer a message given in wire form, reversing the adapter first.
    pub fn add_wire(&mut self, wire: &A::Wire) -> Result<()> {
        let message = self.adapter.to_message(wire)?;
        self.add_message(message)
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    pub fn pop(&mut self) -> Option<Entry> {
        self.entries.pop()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Replay the buffer into a fresh message group.
    pub fn groups(&self) -> MessageGroup {
        let mut group = MessageGroup::default();
        for entry in &self.entries {
            if !entry.item.is_empty() {
                group.push(entry.role, entry.item.clone());
            }
        }
        group
    }

    /// Replay the buffer and project every message through the adapter.
    pub fn materialize(&self) -> Vec<A::Wire> {
        self.groups()
            .iter()
            .map(|message| self.adapter.adapt(message))
            .collect()
    }
}
