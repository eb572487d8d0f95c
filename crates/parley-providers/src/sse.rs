//! Generic SSE (Server-Sent Events) line parser.
//!
//! Converts any chunked byte stream into a `Stream<Item = SseEvent>`. Lines
//! are split on raw bytes, so a multi-byte character spanning two chunks is
//! decoded intact.

use std::fmt::Display;
use std::pin::Pin;

use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt};

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Parse a byte stream as an SSE stream.
pub fn parse_sse_stream<S, E>(bytes: S) -> impl Stream<Item = anyhow::Result<SseEvent>>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + 'static,
{
    futures::stream::unfold(
        SseState {
            byte_stream: Box::pin(bytes),
            buffer: BytesMut::new(),
            current_event: None,
            current_data: Vec::new(),
            current_id: None,
            done: false,
        },
        |mut state| async move {
            if state.done {
                return None;
            }
            loop {
                if let Some(line) = state.next_line() {
                    if line.is_empty() {
                        // Empty line = dispatch event
                        if let Some(event) = state.dispatch() {
                            return Some((Ok(event), state));
                        }
                        continue;
                    }
                    state.field(&line);
                    continue;
                }

                match state.byte_stream.next().await {
                    Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((Err(anyhow::anyhow!("SSE stream error: {e}")), state));
                    }
                    None => {
                        state.done = true;
                        // A trailing line without its newline still counts.
                        if !state.buffer.is_empty() {
                            let rest = state.buffer.split().freeze();
                            state.field(String::from_utf8_lossy(&rest).trim_end_matches('\r'));
                        }
                        return state.dispatch().map(|event| (Ok(event), state));
                    }
                }
            }
        },
    )
}

struct SseState<E> {
    byte_stream: Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send>>,
    buffer: BytesMut,
    current_event: Option<String>,
    current_data: Vec<String>,
    current_id: Option<String>,
    done: bool,
}

impl<E> SseState<E> {
    fn next_line(&mut self) -> Option<String> {
        let newline_pos = self.buffer.iter().position(|b| *b == b'\n')?;
        let line = self.buffer.split_to(newline_pos);
        self.buffer.advance(1);
        Some(String::from_utf8_lossy(&line).trim_end_matches('\r').to_string())
    }

    fn field(&mut self, line: &str) {
        if line.starts_with(':') {
            // Comment
            return;
        }
        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match name {
            "event" => self.current_event = Some(value.to_string()),
            "data" => self.current_data.push(value.to_string()),
            "id" => self.current_id = Some(value.to_string()),
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.current_data.is_empty() {
            self.current_event = None;
            return None;
        }
        let event = SseEvent {
            event: self.current_event.take(),
            data: self.current_data.join("\n"),
            id: self.current_id.take(),
        };
        self.current_data.clear();
        Some(event)
    }
}
