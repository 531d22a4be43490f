//! Async stream that converts raw SSE bytes into [`EventFrame`]s.

use crate::sse::SseDecoder;
use bytes::Bytes;
use futures_core::Stream;
use pin_project_lite::pin_project;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use tether_types::{EventFrame, TransportError};

pin_project! {
    /// An async stream of decoded frames from an event-stream response body.
    ///
    /// Ends with `None` when the body ends; a frame still being assembled at
    /// that point is discarded. Transport failures are yielded once, after
    /// which the stream is finished.
    pub struct FrameStream {
        #[pin]
        inner: Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>,
        decoder: SseDecoder,
        ready: VecDeque<EventFrame>,
        finished: bool,
    }
}

impl FrameStream {
    /// Create a FrameStream from a byte stream.
    pub fn new(
        byte_stream: impl Stream<Item = Result<Bytes, TransportError>> + Send + 'static,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            decoder: SseDecoder::new(),
            ready: VecDeque::new(),
            finished: false,
        }
    }
}

impl Stream for FrameStream {
    type Item = Result<EventFrame, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            // Drain frames decoded from earlier chunks first
            if let Some(frame) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(frame)));
            }
            if *this.finished {
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.ready.extend(this.decoder.feed(&bytes));
                }
                Poll::Ready(Some(Err(e))) => {
                    *this.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    *this.finished = true;
                    if this.decoder.has_pending() {
                        tracing::debug!("Event stream ended mid-frame; discarding partial frame");
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
