//! HTTP transport seam for the identity client
//!
//! The upstream client speaks to the identity service through this trait so
//! tests can substitute a recording double without a network. The production
//! implementation is a thin wrapper over a shared `reqwest` client with the
//! short fail-fast timeout identity operations require.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde_json::Value;
use thiserror::Error;

/// A single outbound HTTP request to the identity service.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL
    pub url: String,
    /// Headers to attach (service credential, bearer token, user agent)
    pub headers: Vec<(String, String)>,
    /// Optional JSON body
    pub body: Option<Value>,
}

/// The response to an outbound request that reached the upstream.
#[derive(Debug, Clone)]
pub struct OutboundResponse {
    /// HTTP status code
    pub status: u16,
    /// Decoded JSON body (`Value::Null` when the body is empty or not JSON)
    pub body: Value,
}

impl OutboundResponse {
    /// Whether the status is in the 2xx range
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Extract the conventional `{"detail": "..."}` message, if present.
    #[must_use]
    pub fn detail(&self) -> Option<String> {
        self.body
            .get("detail")
            .and_then(Value::as_str)
            .map(String::from)
    }
}

/// Transport-level failure: the upstream could not be reached at all.
/// Application-level rejections are *not* errors at this layer; they come
/// back as an [`OutboundResponse`] with a non-2xx status.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection could not be established
    #[error("connect failed: {0}")]
    Connect(String),
    /// The call exceeded its deadline
    #[error("timed out: {0}")]
    Timeout(String),
}

/// Abstract HTTP transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request; `Err` strictly means the upstream was unreachable.
    async fn send(&self, request: OutboundRequest) -> Result<OutboundResponse, TransportError>;
}

/// Production transport backed by `reqwest`
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a transport with a bounded per-call timeout.
    ///
    /// # Panics
    ///
    /// Panics if the underlying TLS backend cannot be initialized, which is
    /// a startup-time condition.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: OutboundRequest) -> Result<OutboundResponse, TransportError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Connect(format!("invalid header name: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Connect(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }

        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(e.to_string())
            } else {
                TransportError::Connect(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok(OutboundResponse { status, body })
    }
}
