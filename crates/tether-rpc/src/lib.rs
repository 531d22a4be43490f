//! Client-side RPC over a split transport.
//!
//! Responses arrive on a long-lived event stream while requests are submitted
//! by HTTP POST to an endpoint the stream announces. A [`Supervisor`] opens the
//! stream, negotiates a [`Session`](tether_types::Session) from its bootstrap
//! frame, submits each request with the first encoding the peer accepts, and
//! waits for the frame carrying the matching correlation id, reconnecting on
//! transient failures.

pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod encoding;
pub mod negotiator;
pub mod queue;
pub mod retry;
pub mod supervisor;

pub use config::EngineConfig;
pub use correlator::{Correlator, FrameMatch, ResponseSchema};
pub use dispatcher::{Dispatcher, SubmissionOutcome};
pub use encoding::{EnvelopeFields, RequestEncoding};
pub use negotiator::Negotiator;
pub use queue::{FrameQueue, ReaderHandle, spawn_reader};
pub use retry::RetryConfig;
pub use supervisor::Supervisor;
