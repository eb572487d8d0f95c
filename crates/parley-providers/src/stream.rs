//! Streaming adaptor from raw Anthropic events to [`StreamEvent`]s.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures::Stream;
use pin_project_lite::pin_project;

use parley_core::{ParleyError, Result};

use crate::StreamEvent;
use crate::anthropic::RawEvent;
use crate::anthropic::translate::StreamTranslator;

pin_project! {
    /// Wraps a stream of raw events and yields translated ones.
    ///
    /// The first error, whether from the source or the translator, is
    /// yielded and ends the stream. A source that ends without a stop event
    /// yields [`ParleyError::IncompleteStream`].
    pub struct TranslatedStream<S> {
        #[pin]
        inner: S,
        translator: StreamTranslator,
        buffered: VecDeque<StreamEvent>,
        done: bool,
    }
}

impl<S> TranslatedStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            translator: StreamTranslator::new(),
            buffered: VecDeque::new(),
            done: false,
        }
    }
}

/// Translate a raw event stream.
pub fn translate<S>(stream: S) -> TranslatedStream<S>
where
    S: Stream<Item = Result<RawEvent>>,
{
    TranslatedStream::new(stream)
}

impl<S> Stream for TranslatedStream<S>
where
    S: Stream<Item = Result<RawEvent>>,
{
    type Item = Result<StreamEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if let Some(event) = this.buffered.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if *this.done {
                return Poll::Ready(None);
            }

            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(raw)) => match this.translator.translate(raw) {
                    Ok(events) => this.buffered.extend(events),
                    Err(e) => {
                        *this.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                },
                Some(Err(e)) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    *this.done = true;
                    if !this.translator.is_stopped() {
                        return Poll::Ready(Some(Err(ParleyError::IncompleteStream)));
                    }
                }
            }
        }
    }
}
