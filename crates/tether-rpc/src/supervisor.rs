//! Session supervisor: drives one call through connect, negotiate, dispatch
//! and correlate, reconnecting on transient failures.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tether_types::{
    CallError, CallState, ConfigError, DispatchError, EventSource, FailureCause, HttpSender,
    RpcResponse, Session, TransportError,
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::EngineConfig;
use crate::correlator::Correlator;
use crate::dispatcher::Dispatcher;
use crate::negotiator::Negotiator;
use crate::queue::{FrameQueue, ReaderHandle, spawn_reader};
use crate::retry::{calculate_delay, is_retryable};

/// An open event stream with its negotiated session.
struct Connection {
    session: Session,
    frames: FrameQueue,
    reader: ReaderHandle,
}

impl Connection {
    fn is_healthy(&self) -> bool {
        !self.reader.is_finished()
    }
}

/// Runs calls against one peer. One call at a time; independent supervisors
/// share nothing.
pub struct Supervisor {
    stream_url: Url,
    source: Arc<dyn EventSource>,
    negotiator: Negotiator,
    dispatcher: Dispatcher,
    correlator: Correlator,
    config: EngineConfig,
    headers: Vec<(String, String)>,
    state: CallState,
    transitions: Vec<CallState>,
    attempt: u32,
    /// Whether the current attempt ran on a session kept from an earlier call.
    reused_session: bool,
    connection: Option<Connection>,
}

impl Supervisor {
    /// Build a supervisor for the event stream at `stream_url`.
    pub fn new(
        stream_url: Url,
        source: Arc<dyn EventSource>,
        sender: Arc<dyn HttpSender>,
        config: EngineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let headers = config.header_pairs();
        let negotiator = Negotiator::new(&config.bootstrap_event, &config.session_param);
        let dispatcher = Dispatcher::new(sender, config.encodings.clone())
            .with_fields(config.fields.clone())
            .with_schema(config.response.clone())
            .with_headers(headers.clone())
            .with_timeout(config.submit_timeout());
        let correlator = Correlator::new(config.response.clone());

        Ok(Self {
            stream_url,
            source,
            negotiator,
            dispatcher,
            correlator,
            config,
            headers,
            state: CallState::Idle,
            transitions: vec![CallState::Idle],
            attempt: 0,
            reused_session: false,
            connection: None,
        })
    }

    /// Current state of the most recent call.
    pub fn state(&self) -> CallState {
        self.state
    }

    /// States visited by the most recent call, in order.
    pub fn transitions(&self) -> &[CallState] {
        &self.transitions
    }

    /// Attempts made by the most recent call.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// The session kept open from the last successful call, if any.
    pub fn session(&self) -> Option<&Session> {
        self.connection.as_ref().map(|c| &c.session)
    }

    /// Release a retained session and its event stream. Idempotent.
    pub fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            tracing::debug!("Closing session {}", connection.session);
            connection.reader.close();
        }
    }

    /// Invoke `method` and wait for its response.
    ///
    /// Transient failures reconnect with backoff until the retry budget is
    /// spent. A kept session that rejects every encoding gets one immediate
    /// retry on a fresh session outside that budget. Cancelling `cancel` aborts at the next await point and closes
    /// the stream.
    pub async fn call(
        &mut self,
        method: &str,
        params: Option<Value>,
        cancel: CancellationToken,
    ) -> Result<RpcResponse, CallError> {
        self.state = CallState::Idle;
        self.transitions.clear();
        self.transitions.push(CallState::Idle);
        self.attempt = 0;

        let max_attempts = self.config.retry.max_attempts();

        loop {
            self.attempt += 1;

            let cause = match self.attempt_once(method, params.as_ref(), &cancel).await {
                Ok(response) => {
                    self.transition(CallState::Complete);
                    if !self.config.reuse_session {
                        self.close();
                    }
                    return Ok(response);
                }
                Err(cause) => cause,
            };

            let failed_in = self.state;

            // The peer may have expired a kept session; try once on a fresh one
            if self.reused_session && is_session_rejection(&cause) {
                tracing::warn!(
                    "Kept session rejected every encoding: {cause}. Retrying on a fresh session"
                );
                self.transition(CallState::Reconnecting);
                continue;
            }

            if !is_retryable(&cause, self.config.redispatch_on_timeout)
                || self.attempt >= max_attempts
            {
                tracing::debug!(
                    "Call '{method}' failed in {failed_in} (attempt {}/{max_attempts}): {cause}",
                    self.attempt
                );
                return Err(self.fail(method, failed_in, cause));
            }

            let delay = calculate_delay(&self.config.retry, self.attempt - 1);
            tracing::warn!(
                "Retryable failure in {failed_in} (attempt {}/{max_attempts}): {cause}. Reconnecting in {delay}ms...",
                self.attempt
            );
            self.transition(CallState::Reconnecting);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(self.fail(method, CallState::Reconnecting, FailureCause::Cancelled));
                }
                _ = tokio::time::sleep(std::time::Duration::from_millis(delay)) => {}
            }
        }
    }

    async fn attempt_once(
        &mut self,
        method: &str,
        params: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<RpcResponse, FailureCause> {
        self.reused_session = false;
        let mut connection = match self.connection.take() {
            Some(connection) if self.config.reuse_session && connection.is_healthy() => {
                tracing::debug!("Reusing session {}", connection.session);
                self.reused_session = true;
                connection
            }
            stale => {
                drop(stale);
                self.connect(cancel).await?
            }
        };

        self.transition(CallState::Dispatching);
        let pending = cancellable(
            cancel,
            self.dispatcher.dispatch(&connection.session, method, params),
        )
        .await?;

        if pending.is_resolved() {
            tracing::debug!("Response to {} arrived with the submission", pending.correlation_id);
        } else {
            self.transition(CallState::AwaitingResponse);
        }

        let response = cancellable(
            cancel,
            self.correlator.correlate(
                &mut connection.frames,
                &pending,
                self.config.response_timeout(),
            ),
        )
        .await?;

        self.connection = Some(connection);
        Ok(response)
    }

    /// Open the event stream and negotiate a session on it.
    async fn connect(&mut self, cancel: &CancellationToken) -> Result<Connection, FailureCause> {
        self.transition(CallState::Connecting);

        let timeout = self.config.connect_timeout();
        let open = self.source.open(&self.stream_url, &self.headers);
        let stream = cancellable(cancel, async {
            match tokio::time::timeout(timeout, open).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }),
            }
        })
        .await?;
        tracing::debug!("Event stream open via {}: {}", self.source.name(), self.stream_url);

        let (mut frames, reader) = spawn_reader(stream, self.config.queue_capacity);

        self.transition(CallState::Negotiating);
        let session = cancellable(
            cancel,
            self.negotiator.negotiate(
                &mut frames,
                &self.stream_url,
                self.config.negotiation_timeout(),
            ),
        )
        .await?;

        Ok(Connection {
            session,
            frames,
            reader,
        })
    }

    fn transition(&mut self, next: CallState) {
        tracing::debug!("Call state: {} -> {next}", self.state);
        self.state = next;
        self.transitions.push(next);
    }

    fn fail(&mut self, method: &str, failed_in: CallState, cause: FailureCause) -> CallError {
        self.close();
        self.transition(CallState::Error);
        CallError {
            method: method.to_string(),
            state: CallState::Error,
            failed_in,
            attempts: self.attempt,
            cause,
        }
    }
}

fn is_session_rejection(cause: &FailureCause) -> bool {
    matches!(
        cause,
        FailureCause::Dispatch(DispatchError::AllEncodingsRejected { .. })
    )
}

/// Race `future` against cancellation.
async fn cancellable<T, E>(
    cancel: &CancellationToken,
    future: impl Future<Output = Result<T, E>>,
) -> Result<T, FailureCause>
where
    E: Into<FailureCause>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FailureCause::Cancelled),
        result = future => result.map_err(Into::into),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use tether_types::{EventStream, HttpRequest, HttpResponse};

    /// Transport whose stream never opens and whose submissions always fail.
    struct Unreachable;

    impl EventSource for Unreachable {
        fn open<'a>(
            &'a self,
            _url: &'a Url,
            _headers: &'a [(String, String)],
        ) -> Pin<Box<dyn Future<Output = Result<EventStream, TransportError>> + Send + 'a>>
        {
            Box::pin(async { Err(TransportError::Connect("connection refused".into())) })
        }

        fn name(&self) -> &str {
            "unreachable"
        }
    }

    impl HttpSender for Unreachable {
        fn send<'a>(
            &'a self,
            _request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>>
        {
            Box::pin(async { Err(TransportError::Connect("connection refused".into())) })
        }
    }

    fn supervisor(config: EngineConfig) -> Result<Supervisor, ConfigError> {
        let transport = Arc::new(Unreachable);
        Supervisor::new(
            Url::parse("http://localhost:1/sse").unwrap(),
            transport.clone(),
            transport,
            config,
        )
    }

    fn no_retry() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.retry.max_retries = 0;
        config
    }

    #[test]
    fn new_validates_config() {
        let config = EngineConfig {
            encodings: vec![],
            ..EngineConfig::default()
        };
        assert!(matches!(
            supervisor(config),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn starts_idle_without_session() {
        let sup = supervisor(EngineConfig::default()).unwrap();
        assert_eq!(sup.state(), CallState::Idle);
        assert_eq!(sup.transitions(), &[CallState::Idle]);
        assert!(sup.session().is_none());
    }

    #[test]
    fn close_is_idempotent() {
        let mut sup = supervisor(EngineConfig::default()).unwrap();
        sup.close();
        sup.close();
        assert!(sup.session().is_none());
    }

    #[tokio::test]
    async fn connect_failure_without_budget_errors() {
        let mut sup = supervisor(no_retry()).unwrap();
        let err = sup
            .call("tools/list", None, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.state, CallState::Error);
        assert_eq!(err.failed_in, CallState::Connecting);
        assert_eq!(err.attempts, 1);
        assert!(matches!(
            err.cause,
            FailureCause::Transport(TransportError::Connect(_))
        ));
        assert_eq!(
            sup.transitions(),
            &[CallState::Idle, CallState::Connecting, CallState::Error]
        );
    }

    #[tokio::test]
    async fn connect_failure_consumes_budget() {
        let mut config = EngineConfig::default();
        config.retry.max_retries = 2;
        config.retry.initial_delay_ms = 1;
        config.retry.jitter = false;
        let mut sup = supervisor(config).unwrap();

        let err = sup
            .call("tools/list", None, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 3);
        let reconnects = sup
            .transitions()
            .iter()
            .filter(|s| **s == CallState::Reconnecting)
            .count();
        assert_eq!(reconnects, 2);
    }

    #[tokio::test]
    async fn already_cancelled_call_returns_cancelled() {
        let mut sup = supervisor(EngineConfig::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = sup.call("tools/list", None, cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.state, CallState::Error);
        assert_eq!(err.attempts, 1);
    }
}
