//! Error hierarchy for Tether.

use crate::CallState;
use thiserror::Error;

/// Failures of either underlying channel.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Stream closed by peer")]
    Closed,

    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Errors while waiting for the bootstrap frame.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("No bootstrap frame within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Malformed submission endpoint '{payload}': {reason}")]
    MalformedEndpoint { payload: String, reason: String },

    #[error("Transport failed during negotiation: {0}")]
    Transport(#[from] TransportError),
}

/// One rejected submission attempt.
#[derive(Debug, Clone)]
pub struct EncodingRejection {
    /// Label of the encoding that was tried.
    pub encoding: String,
    /// HTTP status, or `None` when the request never got a response.
    pub status: Option<u16>,
    pub detail: String,
}

impl std::fmt::Display for EncodingRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{}: HTTP {status} {}", self.encoding, self.detail),
            None => write!(f, "{}: {}", self.encoding, self.detail),
        }
    }
}

/// Errors while submitting a request.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No request encodings configured")]
    NoEncodings,

    #[error("All {} request encodings rejected (last: {})", .attempts.len(), last_rejection(.attempts))]
    AllEncodingsRejected { attempts: Vec<EncodingRejection> },

    #[error("Submission failed: {0}")]
    Transport(TransportError),
}

fn last_rejection(attempts: &[EncodingRejection]) -> String {
    attempts
        .last()
        .map(ToString::to_string)
        .unwrap_or_else(|| "none".to_string())
}

/// Errors while waiting for a matching response.
#[derive(Debug, Error)]
pub enum CorrelationError {
    #[error("No matching response within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Stream closed before a matching response: {reason}")]
    StreamClosed { reason: String },

    #[error("Server sent an error event: {payload}")]
    ServerError { payload: String },
}

/// The underlying error that ended a supervised call.
#[derive(Debug, Error)]
pub enum FailureCause {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Correlation failed: {0}")]
    Correlation(#[from] CorrelationError),

    #[error("Call cancelled")]
    Cancelled,
}

/// Error returned to callers of the supervisor.
///
/// Carries the final state, the state in which the last error happened, and
/// that error.
#[derive(Debug, Error)]
#[error("Call '{method}' failed while {failed_in} after {attempts} attempt(s): {cause}")]
pub struct CallError {
    pub method: String,
    pub state: CallState,
    pub failed_in: CallState,
    pub attempts: u32,
    #[source]
    pub cause: FailureCause,
}

impl CallError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.cause, FailureCause::Cancelled)
    }
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file parse error at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Missing required configuration: {key}")]
    MissingKey { key: String },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}
