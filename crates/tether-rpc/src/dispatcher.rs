//! Request submission over the session's submission endpoint.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tether_types::util::preview;
use tether_types::{
    DispatchError, EncodingRejection, HttpRequest, HttpResponse, HttpSender, PendingRequest,
    RpcResponse, Session, TransportError,
};

use crate::correlator::ResponseSchema;
use crate::encoding::{EnvelopeFields, RequestEncoding};

/// HTTP status a peer returns when the result will arrive on the stream.
const STATUS_ACCEPTED: u16 = 202;

/// What a submission response means for the request.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    /// Accepted; the response will be pushed on the event stream.
    Accepted,
    /// The response body already is the result.
    Completed(Value),
    /// The peer refused this encoding.
    Rejected { status: u16, detail: String },
}

/// Classify a submission response for `correlation_id`.
pub fn classify_submission(
    response: &HttpResponse,
    schema: &ResponseSchema,
    correlation_id: &str,
) -> SubmissionOutcome {
    if !response.is_success() {
        return SubmissionOutcome::Rejected {
            status: response.status,
            detail: preview(&response.body, 200).into_owned(),
        };
    }
    if response.status == STATUS_ACCEPTED {
        return SubmissionOutcome::Accepted;
    }

    match serde_json::from_slice::<Value>(&response.body) {
        Ok(body @ Value::Object(_)) => {
            let foreign = schema
                .correlation_value(&body)
                .is_some_and(|_| !schema.matches(&body, correlation_id));
            if foreign {
                tracing::debug!("Submission body carries another request's id; awaiting stream");
                SubmissionOutcome::Accepted
            } else {
                SubmissionOutcome::Completed(body)
            }
        }
        _ => SubmissionOutcome::Accepted,
    }
}

/// Generate a fresh correlation id.
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Encodes requests and submits them, trying each candidate encoding in order.
#[derive(Clone)]
pub struct Dispatcher {
    sender: Arc<dyn HttpSender>,
    encodings: Vec<RequestEncoding>,
    fields: EnvelopeFields,
    schema: ResponseSchema,
    headers: Vec<(String, String)>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(sender: Arc<dyn HttpSender>, encodings: Vec<RequestEncoding>) -> Self {
        Self {
            sender,
            encodings,
            fields: EnvelopeFields::default(),
            schema: ResponseSchema::default(),
            headers: Vec::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_fields(mut self, fields: EnvelopeFields) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_schema(mut self, schema: ResponseSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Submit `method` to the session under a fresh correlation id.
    ///
    /// Returns as soon as the submission is accepted; it never waits for a
    /// stream-delivered result.
    pub async fn dispatch(
        &self,
        session: &Session,
        method: &str,
        params: Option<&Value>,
    ) -> Result<PendingRequest, DispatchError> {
        if self.encodings.is_empty() {
            return Err(DispatchError::NoEncodings);
        }

        let correlation_id = new_correlation_id();
        let mut attempts = Vec::new();
        let mut last_transport_error: Option<TransportError> = None;

        for (index, encoding) in self.encodings.iter().enumerate() {
            let body = encoding.encode(&self.fields, &correlation_id, method, params);
            let request = HttpRequest::post_json(
                session.submission_endpoint().clone(),
                body.to_string(),
                self.timeout,
            )
            .with_headers(&self.headers);

            tracing::debug!(
                "Submitting {method} as {} (id {correlation_id}, attempt {}/{})",
                encoding.label(),
                index + 1,
                self.encodings.len()
            );
            let sent_at = Utc::now();

            let response = match self.sender.send(request).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!("Submission as {} failed: {e}", encoding.label());
                    attempts.push(EncodingRejection {
                        encoding: encoding.label(),
                        status: None,
                        detail: e.to_string(),
                    });
                    last_transport_error = Some(e);
                    continue;
                }
            };

            let resolved = match classify_submission(&response, &self.schema, &correlation_id) {
                SubmissionOutcome::Accepted => None,
                SubmissionOutcome::Completed(result) => Some(RpcResponse {
                    correlation_id: correlation_id.clone(),
                    is_error: self.schema.is_error(None, &result),
                    result,
                }),
                SubmissionOutcome::Rejected { status, detail } => {
                    tracing::warn!(
                        "Peer rejected {} encoding with HTTP {status}",
                        encoding.label()
                    );
                    attempts.push(EncodingRejection {
                        encoding: encoding.label(),
                        status: Some(status),
                        detail,
                    });
                    continue;
                }
            };

            return Ok(PendingRequest {
                correlation_id,
                method: method.to_string(),
                encoding_attempt: index,
                sent_at,
                resolved,
            });
        }

        // Nothing ever answered: the submission channel itself is down
        match last_transport_error {
            Some(error) if attempts.iter().all(|a| a.status.is_none()) => {
                Err(DispatchError::Transport(error))
            }
            _ => Err(DispatchError::AllEncodingsRejected { attempts }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use url::Url;

    /// Replies with a scripted status/body per submission and records bodies.
    struct ScriptedSender {
        replies: Mutex<Vec<Result<(u16, &'static str), TransportError>>>,
        bodies: Mutex<Vec<Value>>,
        headers: Mutex<Vec<Vec<(String, String)>>>,
    }

    impl ScriptedSender {
        fn new(replies: Vec<Result<(u16, &'static str), TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                bodies: Mutex::new(Vec::new()),
                headers: Mutex::new(Vec::new()),
            })
        }

        fn bodies(&self) -> Vec<Value> {
            self.bodies.lock().unwrap().clone()
        }

        fn headers(&self) -> Vec<Vec<(String, String)>> {
            self.headers.lock().unwrap().clone()
        }
    }

    impl HttpSender for ScriptedSender {
        fn send<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>>
        {
            Box::pin(async move {
                let body: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
                self.bodies.lock().unwrap().push(body);
                self.headers.lock().unwrap().push(request.headers.clone());
                let reply = self.replies.lock().unwrap().pop().expect("unexpected submission");
                reply.map(|(status, body)| HttpResponse {
                    status,
                    body: Bytes::from_static(body.as_bytes()),
                })
            })
        }
    }

    fn session() -> Session {
        let url = Url::parse("http://localhost:8000/messages/?session_id=abc123").unwrap();
        Session::from_endpoint(url, "session_id").unwrap()
    }

    fn response(status: u16, body: &'static str) -> HttpResponse {
        HttpResponse {
            status,
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn classify_accepted() {
        let schema = ResponseSchema::default();
        assert_eq!(
            classify_submission(&response(202, "Accepted"), &schema, "r"),
            SubmissionOutcome::Accepted
        );
        assert_eq!(
            classify_submission(&response(200, ""), &schema, "r"),
            SubmissionOutcome::Accepted
        );
        assert_eq!(
            classify_submission(&response(204, ""), &schema, "r"),
            SubmissionOutcome::Accepted
        );
    }

    #[test]
    fn classify_completed() {
        let schema = ResponseSchema::default();
        let outcome = classify_submission(
            &response(200, r#"{"jsonrpc":"2.0","id":"r","result":{"tools":[]}}"#),
            &schema,
            "r",
        );
        assert!(matches!(outcome, SubmissionOutcome::Completed(v) if v["result"]["tools"] == json!([])));
    }

    #[test]
    fn classify_foreign_body_waits_for_stream() {
        let schema = ResponseSchema::default();
        assert_eq!(
            classify_submission(&response(200, r#"{"id":"other"}"#), &schema, "r"),
            SubmissionOutcome::Accepted
        );
    }

    #[test]
    fn classify_rejected() {
        let schema = ResponseSchema::default();
        assert_eq!(
            classify_submission(&response(406, "Not Acceptable"), &schema, "r"),
            SubmissionOutcome::Rejected {
                status: 406,
                detail: "Not Acceptable".into()
            }
        );
    }

    #[test]
    fn correlation_ids_are_unique() {
        let a = new_correlation_id();
        let b = new_correlation_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[tokio::test]
    async fn falls_back_to_next_encoding() {
        let sender = ScriptedSender::new(vec![Ok((406, "Not Acceptable")), Ok((202, "Accepted"))]);
        let dispatcher = Dispatcher::new(
            sender.clone(),
            vec![RequestEncoding::JsonRpc, RequestEncoding::Bare],
        );

        let pending = dispatcher.dispatch(&session(), "tools/list", None).await.unwrap();
        assert!(!pending.is_resolved());
        assert_eq!(pending.encoding_attempt, 1);
        assert_eq!(pending.method, "tools/list");

        let bodies = sender.bodies();
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[0]["jsonrpc"], "2.0");
        assert_eq!(bodies[1]["type"], "tools/list");
        // Both attempts belong to one call and share its id
        assert_eq!(bodies[0]["id"], pending.correlation_id.as_str());
        assert_eq!(bodies[1]["id"], pending.correlation_id.as_str());
    }

    #[tokio::test]
    async fn synchronous_result_resolves_pending() {
        let sender = ScriptedSender::new(vec![Ok((200, r#"{"result":{"tools":[{"name":"scan"}]}}"#))]);
        let dispatcher = Dispatcher::new(sender, vec![RequestEncoding::JsonRpc]);

        let pending = dispatcher.dispatch(&session(), "tools/list", None).await.unwrap();
        let resolved = pending.resolved.expect("resolved synchronously");
        assert!(!resolved.is_error);
        assert_eq!(resolved.result["result"]["tools"][0]["name"], "scan");
    }

    #[tokio::test]
    async fn synchronous_error_body_is_flagged() {
        let sender = ScriptedSender::new(vec![Ok((
            200,
            r#"{"error":{"code":-32601,"message":"Method not found"}}"#,
        ))]);
        let dispatcher = Dispatcher::new(sender, vec![RequestEncoding::JsonRpc]);
        let pending = dispatcher.dispatch(&session(), "nope", None).await.unwrap();
        assert!(pending.resolved.unwrap().is_error);
    }

    #[tokio::test]
    async fn all_encodings_rejected() {
        let sender = ScriptedSender::new(vec![
            Ok((406, "Not Acceptable")),
            Err(TransportError::Timeout { timeout_ms: 10 }),
            Ok((400, "Bad Request")),
        ]);
        let dispatcher = Dispatcher::new(
            sender,
            vec![
                RequestEncoding::JsonRpc,
                RequestEncoding::Bare,
                RequestEncoding::Wrapped {
                    key: "request".into(),
                },
            ],
        );

        match dispatcher.dispatch(&session(), "tools/list", None).await {
            Err(DispatchError::AllEncodingsRejected { attempts }) => {
                assert_eq!(attempts.len(), 3);
                assert_eq!(attempts[0].status, Some(406));
                assert_eq!(attempts[1].status, None);
                assert_eq!(attempts[2].encoding, "wrapped(request)");
            }
            other => panic!("Expected AllEncodingsRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_only_failures_are_transport_error() {
        let sender = ScriptedSender::new(vec![
            Err(TransportError::Connect("refused".into())),
            Err(TransportError::Connect("refused again".into())),
        ]);
        let dispatcher = Dispatcher::new(
            sender,
            vec![RequestEncoding::JsonRpc, RequestEncoding::Bare],
        );
        match dispatcher.dispatch(&session(), "tools/list", None).await {
            Err(DispatchError::Transport(TransportError::Connect(msg))) => {
                assert_eq!(msg, "refused again")
            }
            other => panic!("Expected Transport, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_encoding_list() {
        let sender = ScriptedSender::new(vec![]);
        let dispatcher = Dispatcher::new(sender, vec![]);
        let err = dispatcher.dispatch(&session(), "tools/list", None).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoEncodings));
    }

    #[tokio::test]
    async fn params_and_headers_are_sent() {
        let sender = ScriptedSender::new(vec![Ok((202, ""))]);
        let dispatcher = Dispatcher::new(sender.clone(), vec![RequestEncoding::JsonRpc])
            .with_headers(vec![("X-Client".into(), "tether".into())]);
        let params = json!({"name": "scan", "arguments": {"path": "."}});
        dispatcher
            .dispatch(&session(), "tools/call", Some(&params))
            .await
            .unwrap();
        assert_eq!(sender.bodies()[0]["params"], params);

        let headers = &sender.headers()[0];
        assert!(headers.contains(&("Content-Type".to_string(), "application/json".to_string())));
        assert!(headers.contains(&("X-Client".to_string(), "tether".to_string())));
    }
}
