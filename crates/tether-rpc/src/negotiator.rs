//! Session negotiation: wait for the bootstrap frame and derive a [`Session`].

use std::time::Duration;

use tether_types::{EventFrame, NegotiationError, Session, TransportError};
use url::Url;

use crate::queue::FrameQueue;

/// Default event name of the bootstrap frame.
pub const DEFAULT_BOOTSTRAP_EVENT: &str = "endpoint";

/// Default query parameter carrying the session token.
pub const DEFAULT_SESSION_PARAM: &str = "session_id";

/// Recognizes the bootstrap frame and extracts the session from it.
#[derive(Debug, Clone)]
pub struct Negotiator {
    bootstrap_event: String,
    session_param: String,
}

impl Default for Negotiator {
    fn default() -> Self {
        Self::new(DEFAULT_BOOTSTRAP_EVENT, DEFAULT_SESSION_PARAM)
    }
}

impl Negotiator {
    pub fn new(bootstrap_event: impl Into<String>, session_param: impl Into<String>) -> Self {
        Self {
            bootstrap_event: bootstrap_event.into(),
            session_param: session_param.into(),
        }
    }

    /// Classify one frame.
    ///
    /// `Ok(None)` for anything that is not the bootstrap frame; an error only
    /// when the bootstrap frame is present but unusable.
    pub fn session_from_frame(
        &self,
        frame: &EventFrame,
        base: &Url,
    ) -> Result<Option<Session>, NegotiationError> {
        if !frame.has_name(&self.bootstrap_event) {
            return Ok(None);
        }

        let payload = frame
            .payload_str()
            .ok_or_else(|| NegotiationError::MalformedEndpoint {
                payload: tether_types::util::preview(&frame.payload, 200).into_owned(),
                reason: "payload is not valid UTF-8".to_string(),
            })?
            .trim();

        let endpoint = resolve_endpoint(base, payload)?;
        Session::from_endpoint(endpoint, &self.session_param)
            .map(Some)
            .ok_or_else(|| NegotiationError::MalformedEndpoint {
                payload: payload.to_string(),
                reason: format!("missing '{}' query parameter", self.session_param),
            })
    }

    /// Consume frames until the bootstrap frame arrives.
    ///
    /// Frames before it are skipped. Frames after it stay in the queue for
    /// the correlator.
    pub async fn negotiate(
        &self,
        frames: &mut FrameQueue,
        base: &Url,
        timeout: Duration,
    ) -> Result<Session, NegotiationError> {
        let wait = async {
            loop {
                match frames.next().await {
                    Some(Ok(frame)) => {
                        if let Some(session) = self.session_from_frame(&frame, base)? {
                            tracing::debug!("Session negotiated: {session}");
                            return Ok(session);
                        }
                        tracing::trace!(
                            "Skipping pre-bootstrap frame {:?}",
                            frame.name.as_deref().unwrap_or(":")
                        );
                    }
                    Some(Err(e)) => return Err(NegotiationError::Transport(e)),
                    None => return Err(NegotiationError::Transport(TransportError::Closed)),
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| NegotiationError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })?
    }
}

/// Resolve a bootstrap payload (absolute URL or path reference) against the stream URL.
pub fn resolve_endpoint(base: &Url, payload: &str) -> Result<Url, NegotiationError> {
    if payload.is_empty() {
        return Err(NegotiationError::MalformedEndpoint {
            payload: String::new(),
            reason: "empty payload".to_string(),
        });
    }
    base.join(payload)
        .map_err(|e| NegotiationError::MalformedEndpoint {
            payload: payload.to_string(),
            reason: e.to_string(),
        })
}
