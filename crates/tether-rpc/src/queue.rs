//! Frame queue fed by a background reader task.
//!
//! The push channel must be drained continuously, including while a request
//! submission is in flight, or frames would be lost. The reader task moves
//! frames from the [`EventStream`] into a bounded channel; the negotiator and
//! correlator consume the other end in arrival order.

use futures_util::StreamExt;
use tether_types::{EventFrame, EventStream, TransportError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Item carried by the queue: a frame, or the transport failure that ended the stream.
pub type FrameResult = Result<EventFrame, TransportError>;

/// Consumer end of the frame queue.
pub struct FrameQueue {
    rx: mpsc::Receiver<FrameResult>,
}

impl FrameQueue {
    /// Create a queue and the sender that feeds it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<FrameResult>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }

    /// A closed queue pre-loaded with `frames`, ending after the last one.
    pub fn from_frames(frames: impl IntoIterator<Item = EventFrame>) -> Self {
        Self::from_results(frames.into_iter().map(Ok))
    }

    /// A closed queue pre-loaded with frames and/or errors.
    pub fn from_results(items: impl IntoIterator<Item = FrameResult>) -> Self {
        let items: Vec<_> = items.into_iter().collect();
        let (tx, queue) = Self::channel(items.len());
        for item in items {
            // Capacity equals the item count, so this never fails
            let _ = tx.try_send(item);
        }
        queue
    }

    /// Wait for the next frame. `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<FrameResult> {
        self.rx.recv().await
    }
}

/// Owns the reader task. Dropping the handle aborts the task, which drops
/// (and so closes) the underlying event stream.
pub struct ReaderHandle {
    task: JoinHandle<()>,
}

impl ReaderHandle {
    /// Stop reading and close the stream. Idempotent.
    pub fn close(&self) {
        self.task.abort();
    }

    /// Whether the reader has stopped (stream ended, failed, or closed).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start draining `stream` into a new queue of the given capacity.
pub fn spawn_reader(stream: EventStream, capacity: usize) -> (FrameQueue, ReaderHandle) {
    let (tx, queue) = FrameQueue::channel(capacity);

    let task = tokio::spawn(async move {
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            let failed = item.is_err();
            if tx.send(item).await.is_err() {
                // Consumer went away
                break;
            }
            if failed {
                break;
            }
        }
        tracing::debug!("Event stream reader finished");
    });

    (queue, ReaderHandle { task })
}
