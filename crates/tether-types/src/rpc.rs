//! Request/response bookkeeping and the supervisor state machine states.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A request submitted to a session, waiting for its response.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Client-generated id the peer echoes in its response.
    pub correlation_id: String,
    pub method: String,
    /// Index into the candidate encoding list that the peer accepted.
    pub encoding_attempt: usize,
    pub sent_at: DateTime<Utc>,
    /// Set when the submission response already carried the result.
    pub resolved: Option<RpcResponse>,
}

impl PendingRequest {
    /// Whether the result arrived synchronously with the submission.
    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }
}

/// A response matched to a [`PendingRequest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcResponse {
    pub correlation_id: String,
    /// The full decoded response payload.
    pub result: serde_json::Value,
    pub is_error: bool,
}

/// States of one supervised call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Idle,
    Connecting,
    Negotiating,
    Dispatching,
    AwaitingResponse,
    Reconnecting,
    Complete,
    Error,
}

impl CallState {
    pub fn as_str(self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Connecting => "connecting",
            CallState::Negotiating => "negotiating",
            CallState::Dispatching => "dispatching",
            CallState::AwaitingResponse => "awaiting_response",
            CallState::Reconnecting => "reconnecting",
            CallState::Complete => "complete",
            CallState::Error => "error",
        }
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
