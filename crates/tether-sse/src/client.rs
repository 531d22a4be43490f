//! reqwest-backed implementations of the two transport channels.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures_util::TryStreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, HeaderMap, HeaderName, HeaderValue};
use tether_types::{
    EventSource, EventStream, HttpMethod, HttpRequest, HttpResponse, HttpSender, TransportError,
};
use url::Url;

use crate::stream::FrameStream;

/// Default TCP connect timeout for both channels.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP transport for the push channel and the submission channel.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with the default connect timeout.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    /// Create a transport with a custom connect timeout.
    pub fn with_connect_timeout(connect_timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Self { http })
    }
}

impl EventSource for HttpTransport {
    fn open<'a>(
        &'a self,
        url: &'a Url,
        headers: &'a [(String, String)],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let mut header_map = build_headers(headers)?;
            header_map.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
            header_map.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

            tracing::debug!("GET {url} (event stream)");
            let response = self
                .http
                .get(url.clone())
                .headers(header_map)
                .send()
                .await
                .map_err(|e| map_send_error(e, None))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(TransportError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let bytes = response
                .bytes_stream()
                .map_err(|e| TransportError::Stream(e.to_string()));
            Ok(Box::pin(FrameStream::new(bytes)) as EventStream)
        })
    }

    fn name(&self) -> &str {
        "reqwest"
    }
}

impl HttpSender for HttpTransport {
    fn send<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let headers = build_headers(&request.headers)?;
            let builder = match request.method {
                HttpMethod::Get => self.http.get(request.url.clone()),
                HttpMethod::Post => self.http.post(request.url.clone()),
            };
            let mut builder = builder.headers(headers).timeout(request.timeout);
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            tracing::debug!("{} {}", request.method.as_str(), request.url);
            let response = builder
                .send()
                .await
                .map_err(|e| map_send_error(e, Some(request.timeout)))?;

            let status = response.status().as_u16();
            let body = response
                .bytes()
                .await
                .map_err(|e| map_send_error(e, Some(request.timeout)))?;

            Ok(HttpResponse { status, body })
        })
    }
}

/// Convert configured header pairs into a reqwest header map.
fn build_headers(headers: &[(String, String)]) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| TransportError::Connect(format!("Invalid header name '{name}'")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| TransportError::Connect(format!("Invalid value for header '{name}'")))?;
        map.append(name, value);
    }
    Ok(map)
}

/// Classify a reqwest failure into a typed TransportError.
fn map_send_error(error: reqwest::Error, timeout: Option<Duration>) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout {
            timeout_ms: timeout.map(|t| t.as_millis() as u64).unwrap_or_default(),
        }
    } else if error.is_body() || error.is_decode() {
        TransportError::Stream(error.to_string())
    } else {
        TransportError::Connect(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_new() {
        assert!(HttpTransport::new().is_ok());
    }

    #[test]
    fn transport_name() {
        let transport = HttpTransport::new().unwrap();
        assert_eq!(EventSource::name(&transport), "reqwest");
    }

    #[test]
    fn build_headers_valid() {
        let map = build_headers(&[
            ("Authorization".into(), "Bearer x".into()),
            ("X-Custom".into(), "1".into()),
        ])
        .unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["x-custom"], "1");
    }

    #[test]
    fn build_headers_invalid_name() {
        let err = build_headers(&[("bad header".into(), "v".into())]).unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)));
    }

    #[test]
    fn build_headers_invalid_value() {
        let err = build_headers(&[("X-Bad".into(), "line\nbreak".into())]).unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)));
    }
}
