//! Server-Sent Events frame decoding and reqwest-backed transports for Tether.

mod client;
mod sse;
mod stream;

pub use client::HttpTransport;
pub use sse::SseDecoder;
pub use stream::FrameStream;
