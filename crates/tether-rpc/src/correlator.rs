//! Response correlation: find the frame that answers a pending request.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_types::util::preview;
use tether_types::{CorrelationError, EventFrame, PendingRequest, RpcResponse};

use crate::queue::FrameQueue;

/// Where responses carry their correlation id and error indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseSchema {
    /// Dotted path to the correlation id (e.g. `id` or `result.request_id`).
    pub id_path: String,
    /// Field whose non-null presence marks an error response.
    pub error_field: String,
    /// Event names that mark error frames.
    pub error_events: Vec<String>,
}

impl Default for ResponseSchema {
    fn default() -> Self {
        Self {
            id_path: "id".to_string(),
            error_field: "error".to_string(),
            error_events: vec!["error".to_string()],
        }
    }
}

impl ResponseSchema {
    /// The value at `id_path`, if present.
    pub fn correlation_value<'a>(&self, payload: &'a Value) -> Option<&'a Value> {
        self.id_path
            .split('.')
            .try_fold(payload, |value, segment| value.get(segment))
    }

    /// Whether `payload` carries `correlation_id` at `id_path`.
    pub fn matches(&self, payload: &Value, correlation_id: &str) -> bool {
        match self.correlation_value(payload) {
            Some(Value::String(id)) => id == correlation_id,
            Some(Value::Number(n)) => n.to_string() == correlation_id,
            _ => false,
        }
    }

    pub fn is_error_event(&self, name: Option<&str>) -> bool {
        name.is_some_and(|name| self.error_events.iter().any(|e| e == name))
    }

    /// Whether a matched response signals an error.
    pub fn is_error(&self, name: Option<&str>, payload: &Value) -> bool {
        self.is_error_event(name)
            || payload
                .get(&self.error_field)
                .is_some_and(|error| !error.is_null())
    }
}

/// How one frame relates to the pending request.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameMatch {
    /// The response we are waiting for.
    Matched(RpcResponse),
    /// Structured payload belonging to other server activity.
    Unrelated,
    /// Keep-alive or a payload that is not JSON.
    Undecodable,
    /// An error event carrying no correlation id; the session is no longer usable.
    Terminal(String),
}

/// Watches the frame queue for the response to a pending request.
#[derive(Debug, Clone, Default)]
pub struct Correlator {
    schema: ResponseSchema,
}

impl Correlator {
    pub fn new(schema: ResponseSchema) -> Self {
        Self { schema }
    }

    /// Classify one frame against `correlation_id`.
    pub fn match_frame(&self, frame: &EventFrame, correlation_id: &str) -> FrameMatch {
        let name = frame.name.as_deref();
        if name.is_none() {
            return FrameMatch::Undecodable;
        }

        let payload = frame.payload_json();
        if let Some(payload) = &payload {
            if self.schema.matches(payload, correlation_id) {
                return FrameMatch::Matched(RpcResponse {
                    correlation_id: correlation_id.to_string(),
                    is_error: self.schema.is_error(name, payload),
                    result: payload.clone(),
                });
            }
            // Addressed to another request
            if self.schema.correlation_value(payload).is_some() {
                return FrameMatch::Unrelated;
            }
        }

        if self.schema.is_error_event(name) {
            FrameMatch::Terminal(preview(&frame.payload, 500).into_owned())
        } else if payload.is_some() {
            FrameMatch::Unrelated
        } else {
            FrameMatch::Undecodable
        }
    }

    /// Consume frames until one answers `pending`, the timeout elapses, or
    /// the stream ends.
    pub async fn correlate(
        &self,
        frames: &mut FrameQueue,
        pending: &PendingRequest,
        timeout: Duration,
    ) -> Result<RpcResponse, CorrelationError> {
        if let Some(response) = &pending.resolved {
            return Ok(response.clone());
        }

        let id = pending.correlation_id.as_str();
        let wait = async {
            loop {
                let frame = match frames.next().await {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        return Err(CorrelationError::StreamClosed {
                            reason: e.to_string(),
                        });
                    }
                    None => {
                        return Err(CorrelationError::StreamClosed {
                            reason: "event stream ended".to_string(),
                        });
                    }
                };

                match self.match_frame(&frame, id) {
                    FrameMatch::Matched(response) => {
                        tracing::debug!(
                            "Matched response for {id} (error: {})",
                            response.is_error
                        );
                        return Ok(response);
                    }
                    FrameMatch::Terminal(payload) => {
                        return Err(CorrelationError::ServerError { payload });
                    }
                    FrameMatch::Unrelated => {
                        tracing::trace!(
                            "Discarding unrelated frame: {}",
                            preview(&frame.payload, 100)
                        );
                    }
                    FrameMatch::Undecodable => {}
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| CorrelationError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn pending(id: &str) -> PendingRequest {
        PendingRequest {
            correlation_id: id.to_string(),
            method: "tools/list".to_string(),
            encoding_attempt: 0,
            sent_at: Utc::now(),
            resolved: None,
        }
    }

    fn message(payload: Value) -> EventFrame {
        EventFrame::named("message", payload.to_string())
    }

    #[test]
    fn nested_id_path() {
        let schema = ResponseSchema {
            id_path: "meta.request_id".into(),
            ..ResponseSchema::default()
        };
        assert!(schema.matches(&json!({"meta": {"request_id": "r"}}), "r"));
        assert!(!schema.matches(&json!({"request_id": "r"}), "r"));
    }

    #[test]
    fn numeric_ids_match_their_decimal_form() {
        let schema = ResponseSchema::default();
        assert!(schema.matches(&json!({"id": 7}), "7"));
        assert!(!schema.matches(&json!({"id": 7}), "8"));
        assert!(!schema.matches(&json!({"id": null}), "null"));
    }

    #[test]
    fn error_field_marks_error() {
        let schema = ResponseSchema::default();
        let err = json!({"id": "r", "error": {"code": -32601, "message": "Method not found"}});
        assert!(schema.is_error(Some("message"), &err));
        assert!(!schema.is_error(Some("message"), &json!({"id": "r", "error": null})));
        assert!(schema.is_error(Some("error"), &json!({"id": "r"})));
    }

    #[test]
    fn match_frame_classification() {
        let correlator = Correlator::default();
        assert_eq!(
            correlator.match_frame(&EventFrame::keep_alive("ping"), "r"),
            FrameMatch::Undecodable
        );
        assert_eq!(
            correlator.match_frame(&EventFrame::named("message", "plain text"), "r"),
            FrameMatch::Undecodable
        );
        assert_eq!(
            correlator.match_frame(&message(json!({"id": "other"})), "r"),
            FrameMatch::Unrelated
        );
        assert!(matches!(
            correlator.match_frame(&EventFrame::named("error", "boom"), "r"),
            FrameMatch::Terminal(p) if p == "boom"
        ));
        match correlator.match_frame(&message(json!({"id": "r", "result": {"tools": []}})), "r") {
            FrameMatch::Matched(response) => {
                assert_eq!(response.correlation_id, "r");
                assert!(!response.is_error);
                assert_eq!(response.result["result"]["tools"], json!([]));
            }
            other => panic!("Expected match, got {other:?}"),
        }
    }

    #[test]
    fn error_event_addressed_to_us_is_an_error_response() {
        let correlator = Correlator::default();
        let frame = EventFrame::named("error", json!({"id": "r", "message": "bad"}).to_string());
        match correlator.match_frame(&frame, "r") {
            FrameMatch::Matched(response) => assert!(response.is_error),
            other => panic!("Expected match, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn correlate_skips_noise_and_returns_first_match() {
        let correlator = Correlator::default();
        let mut queue = FrameQueue::from_frames(vec![
            EventFrame::keep_alive("ping"),
            message(json!({"id": "someone-else", "result": 1})),
            EventFrame::named("message", "{truncated"),
            message(json!({"id": "mine", "result": "first"})),
            message(json!({"id": "mine", "result": "second"})),
        ]);

        let response = correlator
            .correlate(&mut queue, &pending("mine"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.result["result"], "first");

        // The duplicate is left unread
        let next = queue.next().await.unwrap().unwrap();
        assert_eq!(next.payload_json().unwrap()["result"], "second");
    }

    #[tokio::test]
    async fn correlate_bare_result_shape() {
        let correlator = Correlator::default();
        let mut queue = FrameQueue::from_frames(vec![message(json!({
            "type": "tools/list_result",
            "id": "req_1",
            "tools": [{"name": "scan", "description": "Scan code"}]
        }))]);
        let response = correlator
            .correlate(&mut queue, &pending("req_1"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.result["tools"][0]["name"], "scan");
    }

    #[tokio::test]
    async fn correlate_stream_closed() {
        let correlator = Correlator::default();
        let mut queue = FrameQueue::from_frames(vec![message(json!({"id": "other"}))]);
        let err = correlator
            .correlate(&mut queue, &pending("mine"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CorrelationError::StreamClosed { .. }));
    }

    #[tokio::test]
    async fn correlate_transport_error_is_stream_closed() {
        let correlator = Correlator::default();
        let mut queue = FrameQueue::from_results(vec![Err(
            tether_types::TransportError::Stream("reset by peer".into()),
        )]);
        match correlator
            .correlate(&mut queue, &pending("mine"), Duration::from_secs(1))
            .await
        {
            Err(CorrelationError::StreamClosed { reason }) => {
                assert!(reason.contains("reset by peer"), "{reason}")
            }
            other => panic!("Expected StreamClosed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn correlate_times_out() {
        let correlator = Correlator::default();
        let (tx, mut queue) = FrameQueue::channel(4);
        tx.send(Ok(message(json!({"id": "other"})))).await.unwrap();

        let err = correlator
            .correlate(&mut queue, &pending("mine"), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, CorrelationError::Timeout { timeout_ms: 50 }));
        drop(tx);
    }

    #[tokio::test]
    async fn correlate_unaddressed_error_event_is_terminal() {
        let correlator = Correlator::default();
        let mut queue = FrameQueue::from_frames(vec![EventFrame::named(
            "error",
            "session expired",
        )]);
        let err = correlator
            .correlate(&mut queue, &pending("mine"), Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            CorrelationError::ServerError { payload } => assert_eq!(payload, "session expired"),
            other => panic!("Expected ServerError, got {other:?}"),
        }
    }

    #[test]
    fn error_event_for_another_request_is_unrelated() {
        let correlator = Correlator::default();
        let frame = EventFrame::named(
            "error",
            json!({"id": "other-request", "error": {"code": -32601}}).to_string(),
        );
        assert_eq!(correlator.match_frame(&frame, "mine"), FrameMatch::Unrelated);

        // Structured but unaddressed error events still end the session
        let frame = EventFrame::named("error", json!({"error": "session expired"}).to_string());
        assert!(matches!(
            correlator.match_frame(&frame, "mine"),
            FrameMatch::Terminal(_)
        ));
    }

    #[tokio::test]
    async fn correlate_skips_error_event_addressed_elsewhere() {
        let correlator = Correlator::default();
        let mut queue = FrameQueue::from_frames(vec![
            EventFrame::named(
                "error",
                json!({"id": "other-request", "error": {"code": -32601}}).to_string(),
            ),
            message(json!({"id": "mine", "result": {"ok": true}})),
        ]);
        let response = correlator
            .correlate(&mut queue, &pending("mine"), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!response.is_error);
        assert_eq!(response.result["result"]["ok"], true);
    }

    #[tokio::test]
    async fn resolved_pending_short_circuits() {
        let correlator = Correlator::default();
        let mut request = pending("mine");
        request.resolved = Some(RpcResponse {
            correlation_id: "mine".into(),
            result: json!({"ok": true}),
            is_error: false,
        });
        let mut queue = FrameQueue::from_frames(Vec::new());
        let response = correlator
            .correlate(&mut queue, &request, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(response.result["ok"], true);
    }
}
