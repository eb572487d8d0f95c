//! Turn tracking: the requests that opened a conversational turn and the
//! replies generated for it.
//!
//! A [`Turn`] is identified by the stream id of its first request. Replies
//! are addressed by a cursor; advancing past the end appends a reply, while
//! advancing after [`Turn::resume`] revises the interrupted reply in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregate::{DeferredAggregator, MessageAdapter};
use crate::content::{ContentItem, Role, ToolCall, ToolResult};
use crate::error::Result;

/// One inbound user turn-start signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub stream_id: String,
    pub utterance: String,
    pub received_at: DateTime<Utc>,
}

/// One generated reply, possibly revised while it is still streaming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Full text of the reply.
    pub utterance: String,
    pub tool_call: Option<ToolCall>,
    pub tool_result: Option<ToolResult>,
    /// The part of `utterance` that was actually delivered to the user.
    pub played_utterance: String,
    pub interrupted: bool,
    /// Requests the turn had received when this reply was first written.
    /// Revisions keep it, so replay stays in arrival order.
    #[serde(default)]
    pub after_requests: usize,
    pub updated_at: DateTime<Utc>,
}

impl Reply {
    fn new(
        utterance: String,
        tool_call: Option<ToolCall>,
        tool_result: Option<ToolResult>,
        after_requests: usize,
    ) -> Self {
        Self {
            utterance,
            tool_call,
            tool_result,
            played_utterance: String::new(),
            interrupted: false,
            after_requests,
            updated_at: Utc::now(),
        }
    }

    /// Text the user actually heard: the played part if interrupted.
    pub fn delivered_text(&self) -> &str {
        if self.interrupted {
            &self.played_utterance
        } else {
            &self.utterance
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    #[default]
    AwaitingReply,
    Replying,
    Settled,
}

/// What happens to playback flags when a reply is revised in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionPolicy {
    /// `played_utterance` and `interrupted` survive the revision.
    #[default]
    KeepPlayback,
    /// Both flags are cleared, as if the reply were new.
    ResetPlayback,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub requests: Vec<Request>,
    pub replies: Vec<Reply>,
    reply_cursor: Option<usize>,
    state: TurnState,
    revision_policy: RevisionPolicy,
}

impl Turn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_revision_policy(mut self, policy: RevisionPolicy) -> Self {
        self.revision_policy = policy;
        self
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn reply_cursor(&self) -> Option<usize> {
        self.reply_cursor
    }

    pub fn current_reply(&self) -> Option<&Reply> {
        self.reply_cursor.and_then(|i| self.replies.get(i))
    }

    /// Record a user request. Takes on `stream_id` as identity if the turn
    /// has none yet.
    pub fn start(&mut self, stream_id: &str, utterance: &str) {
        self.requests.push(Request {
            stream_id: stream_id.to_string(),
            utterance: utterance.to_string(),
            received_at: Utc::now(),
        });
        if self.id.is_empty() {
            self.id = stream_id.to_string();
        }
        self.state = TurnState::AwaitingReply;
    }

    /// Advance to the next reply and write it.
    ///
    /// Returns `None` without touching the turn when `stream_id` belongs to
    /// another turn, or when the turn was never started.
    pub fn advance_reply(
        &mut self,
        stream_id: &str,
        utterance: &str,
        tool_call: Option<ToolCall>,
        tool_result: Option<ToolResult>,
    ) -> Option<&Reply> {
        if self.id.is_empty() {
            debug!(stream_id, "dropping reply for a turn that was never started");
            return None;
        }
        if stream_id != self.id {
            debug!(turn = %self.id, stream_id, "dropping reply for another turn");
            return None;
        }

        let cursor = self.reply_cursor.map_or(0, |i| i + 1);
        self.reply_cursor = Some(cursor);
        self.state = TurnState::Replying;

        if cursor < self.replies.len() {
            let reply = &mut self.replies[cursor];
            reply.utterance = utterance.to_string();
            reply.tool_call = tool_call;
            reply.tool_result = tool_result;
            reply.updated_at = Utc::now();
            if self.revision_policy == RevisionPolicy::ResetPlayback {
                reply.played_utterance.clear();
                reply.interrupted = false;
            }
        } else {
            self.replies.push(Reply::new(
                utterance.to_string(),
                tool_call,
                tool_result,
                self.requests.len(),
            ));
        }
        self.replies.get(cursor)
    }

    /// Mark the current reply as cut off after `played_utterance`.
    pub fn interrupt(&mut self, played_utterance: &str) -> Option<&Reply> {
        let reply = self.reply_cursor.and_then(|i| self.replies.get_mut(i))?;
        reply.interrupted = true;
        reply.played_utterance = played_utterance.to_string();
        reply.updated_at = Utc::now();
        Some(&*reply)
    }

    /// Step the cursor back onto an interrupted reply so the next
    /// [`advance_reply`](Self::advance_reply) revises it. Returns whether the
    /// cursor moved.
    pub fn resume(&mut self) -> bool {
        match self.reply_cursor {
            Some(i) if self.replies.get(i).is_some_and(|r| r.interrupted) => {
                self.reply_cursor = i.checked_sub(1);
                true
            }
            _ => false,
        }
    }

    pub fn settle(&mut self) {
        self.state = TurnState::Settled;
    }

    /// Replay this turn into an aggregator in arrival order: requests as
    /// user text, replies as assistant text followed by their tool call and
    /// result.
    pub fn feed<A: MessageAdapter>(&self, history: &mut DeferredAggregator<A>) -> Result<()> {
        let mut fed = 0;
        for reply in &self.replies {
            let due = reply.after_requests.min(self.requests.len());
            for request in self.requests.get(fed..due).unwrap_or_default() {
                history.add(Role::User, ContentItem::text(request.utterance.as_str()))?;
            }
            fed = fed.max(due);

            history.add(Role::Assistant, ContentItem::text(reply.delivered_text()))?;
            if let Some(call) = &reply.tool_call {
                history.add(Role::Assistant, ContentItem::ToolCall(call.clone()))?;
            }
            if let Some(result) = &reply.tool_result {
                history.add(Role::Tool, ContentItem::ToolResult(result.clone()))?;
            }
        }
        for request in &self.requests[fed..] {
            history.add(Role::User, ContentItem::text(request.utterance.as_str()))?;
        }
        Ok(())
    }
}

/// Turns of one conversation, looked up by stream id.
#[derive(Debug, Clone, Default)]
pub struct Dialogue {
    turns: Vec<Turn>,
    revision_policy: RevisionPolicy,
}

impl Dialogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_revision_policy(policy: RevisionPolicy) -> Self {
        Self {
            turns: Vec::new(),
            revision_policy: policy,
        }
    }

    /// Route a request to its turn, opening one the first time `stream_id`
    /// is seen.
    pub fn start(&mut self, stream_id: &str, utterance: &str) -> &mut Turn {
        let index = match self.turns.iter().position(|t| t.id == stream_id) {
            Some(index) => index,
            None => {
                self.turns
                    .push(Turn::new().with_revision_policy(self.revision_policy));
                self.turns.len() - 1
            }
        };
        let turn = &mut self.turns[index];
        turn.start(stream_id, utterance);
        turn
    }

    pub fn turn(&self, stream_id: &str) -> Option<&Turn> {
        self.turns.iter().find(|t| t.id == stream_id)
    }

    pub fn turn_mut(&mut self, stream_id: &str) -> Option<&mut Turn> {
        self.turns.iter_mut().find(|t| t.id == stream_id)
    }

    pub fn latest(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn latest_mut(&mut self) -> Option<&mut Turn> {
        self.turns.last_mut()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Drop the turn for a retired stream id.
    pub fn retire(&mut self, stream_id: &str) -> Option<Turn> {
        let index = self.turns.iter().position(|t| t.id == stream_id)?;
        Some(self.turns.remove(index))
    }

    /// Replay every turn, oldest first.
    pub fn feed<A: MessageAdapter>(&self, history: &mut DeferredAggregator<A>) -> Result<()> {
        for turn in &self.turns {
            turn.feed(history)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn lookup(id: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: "lookup".into(),
            input: Map::new(),
        }
    }

    #[test]
    fn test_start_assigns_identity_once() {
        let mut turn = Turn::new();
        turn.start("s1", "hello");
        turn.start("s2", "are you there?");
        assert_eq!(turn.id, "s1");
        assert_eq!(turn.requests.len(), 2);
        assert_eq!(turn.state(), TurnState::AwaitingReply);
    }

    #[test]
    fn test_each_advance_appends_a_reply() {
        let mut turn = Turn::new();
        turn.start("s1", "hi");
        for i in 0..3 {
            let reply = turn.advance_reply("s1", &format!("part {i}"), None, None).unwrap();
            assert_eq!(reply.utterance, format!("part {i}"));
        }
        assert_eq!(turn.replies.len(), 3);
        assert_eq!(turn.reply_cursor(), Some(2));
        assert_eq!(turn.state(), TurnState::Replying);
    }

    #[test]
    fn test_cross_turn_write_is_ignored() {
        let mut turn = Turn::new();
        turn.start("s1", "hi");
        turn.advance_reply("s1", "first", None, None);
        let before = turn.clone();

        assert!(turn.advance_reply("other", "intruder", None, None).is_none());
        assert_eq!(turn, before);
    }

    #[test]
    fn test_resume_revises_interrupted_reply() {
        let mut turn = Turn::new();
        turn.start("s1", "tell me a story");
        turn.advance_reply("s1", "Once upon a time there was", None, None);
        turn.interrupt("Once upon");

        assert!(turn.resume());
        let reply = turn
            .advance_reply("s1", "Once upon a time there was a crab", None, None)
            .unwrap();
        assert_eq!(reply.utterance, "Once upon a time there was a crab");
        // default policy keeps playback flags
        assert!(reply.interrupted);
        assert_eq!(reply.played_utterance, "Once upon");
        assert_eq!(turn.replies.len(), 1);
        assert_eq!(turn.reply_cursor(), Some(0));
    }

    #[test]
    fn test_reset_playback_policy() {
        let mut turn = Turn::new().with_revision_policy(RevisionPolicy::ResetPlayback);
        turn.start("s1", "go");
        turn.advance_reply("s1", "one", None, None);
        turn.advance_reply("s1", "two", None, None);
        turn.interrupt("tw");
        assert!(turn.resume());

        let reply = turn.advance_reply("s1", "two, again", None, None).unwrap();
        assert!(!reply.interrupted);
        assert!(reply.played_utterance.is_empty());
        assert_eq!(turn.replies.len(), 2);
    }

    #[test]
    fn test_resume_without_interruption_is_noop() {
        let mut turn = Turn::new();
        turn.start("s1", "go");
        assert!(!turn.resume());
        turn.advance_reply("s1", "one", None, None);
        assert!(!turn.resume());
        assert_eq!(turn.reply_cursor(), Some(0));
    }

    #[test]
    fn test_settled_turn_reenters() {
        let mut turn = Turn::new();
        turn.start("s1", "go");
        turn.advance_reply("s1", "done", None, None);
        turn.settle();
        assert_eq!(turn.state(), TurnState::Settled);
        turn.advance_reply("s1", "one more thing", None, None);
        assert_eq!(turn.state(), TurnState::Replying);
    }

    #[test]
    fn test_feed_replays_turn() {
        let mut turn = Turn::new();
        turn.start("s1", "weather in Oslo?");
        turn.advance_reply("s1", "Checking.", Some(lookup("t1")), Some(ToolResult::ok("t1", "rain")));
        turn.advance_reply("s1", "It is raining in Oslo right now", None, None);
        turn.interrupt("It is raining");

        let mut history = DeferredAggregator::new();
        turn.feed(&mut history).unwrap();
        let group = history.groups();
        let roles: Vec<Role> = group.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        assert_eq!(group[1].content.len(), 2);
        assert_eq!(group[3].content[0].as_text(), Some("It is raining"));
        group.debug_assert_tool_links();
    }

    #[test]
    fn test_feed_keeps_follow_up_order() {
        let mut turn = Turn::new();
        turn.start("s1", "first question");
        turn.advance_reply("s1", "first answer", None, None);
        turn.settle();
        turn.start("s1", "follow-up question");
        turn.advance_reply("s1", "second answer", None, None);

        let mut history = DeferredAggregator::new();
        turn.feed(&mut history).unwrap();
        let group = history.groups();
        let texts: Vec<Vec<&str>> = group
            .iter()
            .map(|m| m.content.iter().filter_map(ContentItem::as_text).collect())
            .collect();
        assert_eq!(
            texts,
            vec![
                vec!["first question"],
                vec!["first answer"],
                vec!["follow-up question"],
                vec!["second answer"],
            ]
        );
    }

    #[test]
    fn test_feed_trailing_request_without_reply() {
        let mut turn = Turn::new();
        turn.start("s1", "hello");
        turn.advance_reply("s1", "hi there", None, None);
        turn.start("s1", "still there?");

        let mut history = DeferredAggregator::new();
        turn.feed(&mut history).unwrap();
        let roles: Vec<Role> = history.groups().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
    }

    #[test]
    fn test_unstarted_turn_rejects_replies() {
        let mut turn = Turn::new();
        assert!(turn.advance_reply("", "orphan", None, None).is_none());
        assert!(turn.replies.is_empty());
        assert_eq!(turn.reply_cursor(), None);
        assert_eq!(turn.state(), TurnState::AwaitingReply);
    }

    #[test]
    fn test_dialogue_routes_by_stream_id() {
        let mut dialogue = Dialogue::new();
        dialogue.start("s1", "first");
        dialogue.start("s2", "second");
        dialogue.start("s1", "first, follow-up");

        assert_eq!(dialogue.turns().len(), 2);
        assert_eq!(dialogue.turn("s1").unwrap().requests.len(), 2);
        assert_eq!(dialogue.latest().unwrap().id, "s2");

        let retired = dialogue.retire("s1").unwrap();
        assert_eq!(retired.id, "s1");
        assert!(dialogue.turn("s1").is_none());
    }
}
