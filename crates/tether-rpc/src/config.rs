//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tether_types::ConfigError;

use crate::correlator::ResponseSchema;
use crate::encoding::{EnvelopeFields, RequestEncoding, default_encodings};
use crate::negotiator::{DEFAULT_BOOTSTRAP_EVENT, DEFAULT_SESSION_PARAM};
use crate::retry::RetryConfig;

/// Everything a [`Supervisor`](crate::Supervisor) needs besides its transports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Event name of the bootstrap frame.
    pub bootstrap_event: String,
    /// Query parameter carrying the session token.
    pub session_param: String,
    /// Request encodings, tried in order.
    pub encodings: Vec<RequestEncoding>,
    pub fields: EnvelopeFields,
    pub response: ResponseSchema,
    /// Extra headers sent on both the stream and submissions.
    pub headers: HashMap<String, String>,
    pub connect_timeout_ms: u64,
    pub negotiation_timeout_ms: u64,
    pub submit_timeout_ms: u64,
    pub response_timeout_ms: u64,
    /// Frames buffered between the reader task and the consumer.
    pub queue_capacity: usize,
    /// Keep the session open between calls.
    pub reuse_session: bool,
    /// Treat a response timeout as retryable. The peer may then see the
    /// request twice.
    pub redispatch_on_timeout: bool,
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bootstrap_event: DEFAULT_BOOTSTRAP_EVENT.to_string(),
            session_param: DEFAULT_SESSION_PARAM.to_string(),
            encodings: default_encodings(),
            fields: EnvelopeFields::default(),
            response: ResponseSchema::default(),
            headers: HashMap::new(),
            connect_timeout_ms: 10_000,
            negotiation_timeout_ms: 10_000,
            submit_timeout_ms: 10_000,
            response_timeout_ms: 30_000,
            queue_capacity: 256,
            reuse_session: true,
            redispatch_on_timeout: false,
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Headers as ordered pairs, sorted by name.
    pub fn header_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<_> = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        pairs.sort();
        pairs
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.encodings.is_empty() {
            return Err(invalid("encodings", "at least one encoding is required"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity", "must be greater than zero"));
        }
        if self.bootstrap_event.is_empty() {
            return Err(invalid("bootstrap_event", "must not be empty"));
        }
        if self.session_param.is_empty() {
            return Err(invalid("session_param", "must not be empty"));
        }
        if self.response.id_path.is_empty() {
            return Err(invalid("response.id_path", "must not be empty"));
        }
        if self.retry.backoff_factor.is_nan() || self.retry.backoff_factor < 1.0 {
            return Err(invalid("retry.backoff_factor", "must be at least 1.0"));
        }
        let keyless = self
            .encodings
            .iter()
            .any(|e| matches!(e, RequestEncoding::Wrapped { key } if key.is_empty()));
        if keyless {
            return Err(invalid("encodings", "wrapped encoding needs a key"));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
