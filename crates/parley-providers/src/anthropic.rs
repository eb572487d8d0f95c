//! Anthropic Messages API support.
//!
//! Decodes the streaming event protocol (`message_start`,
//! `content_block_start`, `content_block_delta`, `content_block_stop`,
//! `message_delta`, `message_stop`) and builds request bodies.

use futures::{Stream, StreamExt};
use tracing::warn;

use parley_core::{ParleyError, Result};

use crate::sse::SseEvent;

pub mod events;
pub mod request;
pub mod translate;

pub use events::RawEvent;
pub use request::{AnthropicParams, AnthropicRequest, RequestBuilder};

/// Decode SSE events into raw Anthropic events.
///
/// Transport errors pass through; payloads that fail to decode are logged and
/// skipped.
pub fn decode_events<S>(sse: S) -> impl Stream<Item = Result<RawEvent>>
where
    S: Stream<Item = anyhow::Result<SseEvent>>,
{
    sse.filter_map(|item| {
        let decoded = match item {
            Ok(event) => match serde_json::from_str::<RawEvent>(&event.data) {
                Ok(raw) => Some(Ok(raw)),
                Err(e) => {
                    warn!(%e, event = ?event.event, data = %event.data, "Skipping undecodable Anthropic event");
                    None
                }
            },
            Err(e) => Some(Err(ParleyError::Other(e))),
        };
        futures::future::ready(decoded)
    })
}
