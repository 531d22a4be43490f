//! Decoded event-stream frames.

use bytes::Bytes;

/// Event name the Server-Sent Events format assigns to data without an `event:` line.
pub const DEFAULT_EVENT_NAME: &str = "message";

/// A single named event decoded from the push channel.
///
/// `name` is `None` for comment / keep-alive lines. The payload is the exact
/// byte content of the frame's `data:` lines joined with `\n`; interpreting
/// it (as JSON or otherwise) is left to consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFrame {
    pub name: Option<String>,
    pub payload: Bytes,
}

impl EventFrame {
    /// Create a named frame.
    pub fn named(name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            name: Some(name.into()),
            payload: payload.into(),
        }
    }

    /// Create a keep-alive frame (no event name).
    pub fn keep_alive(payload: impl Into<Bytes>) -> Self {
        Self {
            name: None,
            payload: payload.into(),
        }
    }

    /// Whether this frame is a comment / keep-alive.
    pub fn is_keep_alive(&self) -> bool {
        self.name.is_none()
    }

    /// Whether the frame carries the given event name.
    pub fn has_name(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name)
    }

    /// The payload as UTF-8 text, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Best-effort decode of the payload as JSON.
    pub fn payload_json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.payload).ok()
    }
}
