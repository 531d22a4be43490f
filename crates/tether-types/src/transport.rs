//! Collaborator traits for the two channels of the split transport.

use crate::{EventFrame, TransportError};
use bytes::Bytes;
use futures_core::Stream;
use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use url::Url;

/// A boxed async stream of decoded frames. Dropping it closes the connection.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventFrame, TransportError>> + Send>>;

/// Opens the push channel.
///
/// Dyn-compatible so the supervisor works with `Arc<dyn EventSource>`.
pub trait EventSource: Send + Sync {
    /// Connect to `url` and return the lazily decoded frame stream.
    fn open<'a>(
        &'a self,
        url: &'a Url,
        headers: &'a [(String, String)],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, TransportError>> + Send + 'a>>;

    /// Transport name for logging (e.g., "reqwest").
    fn name(&self) -> &str;
}

/// HTTP verbs the engine issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// A single request on the submission channel.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
}

impl HttpRequest {
    /// A JSON `POST` with the given body.
    pub fn post_json(url: Url, body: String, timeout: Duration) -> Self {
        Self {
            method: HttpMethod::Post,
            url,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Some(body),
            timeout,
        }
    }

    /// A bodiless `GET`.
    pub fn get(url: Url, timeout: Duration) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            headers: Vec::new(),
            body: None,
            timeout,
        }
    }

    pub fn with_headers(mut self, headers: &[(String, String)]) -> Self {
        self.headers.extend(headers.iter().cloned());
        self
    }
}

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Sends requests on the submission channel.
pub trait HttpSender: Send + Sync {
    /// Send one request, honoring `request.timeout`.
    fn send<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>>;
}
