//! Generic HTTP reverse proxy
//!
//! Forwards method, filtered headers, query string and body to a resolved
//! backend and relays the response back unchanged. Hop-by-hop headers and
//! the host header are stripped in both directions. Identity calls have
//! their own short-timeout transport; this client runs with the longer
//! general-purpose deadline.

use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Method, Response, StatusCode};
use bytes::Bytes;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Hop-by-hop headers (RFC 9110 §7.6.1) plus `host`, which the client sets
/// for the backend itself.
const STRIPPED_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// Whether a header survives proxying.
#[must_use]
pub fn is_forwardable(name: &str) -> bool {
    !STRIPPED_HEADERS.contains(&name.to_lowercase().as_str())
}

/// Reverse proxy over a shared `reqwest` client.
pub struct HttpProxy {
    client: reqwest::Client,
}

impl HttpProxy {
    /// Build a proxy with a per-request timeout.
    ///
    /// # Panics
    ///
    /// Panics if the underlying TLS backend cannot be initialized, which is
    /// a startup-time condition.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }

    /// Forward a request to `url` and relay the backend response.
    pub async fn forward(
        &self,
        method: Method,
        url: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response<Body>> {
        let url = match query {
            Some(q) if !q.is_empty() => format!("{url}?{q}"),
            _ => url.to_string(),
        };
        debug!(method = %method, url = %url, "Proxying request");

        let mut outbound = reqwest::header::HeaderMap::new();
        for (name, value) in headers {
            if is_forwardable(name.as_str()) {
                outbound.insert(name.clone(), value.clone());
            }
        }
        // Correlate gateway hops when the edge did not assign an ID
        if !outbound.contains_key("x-request-id") {
            if let Ok(value) = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()) {
                outbound.insert("x-request-id", value);
            }
        }

        let response = self
            .client
            .request(method, &url)
            .headers(outbound)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Backend unreachable");
                Error::BadGateway(e.to_string())
            })?;

        let status =
            StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        let mut builder = Response::builder().status(status);
        for (name, value) in response.headers() {
            if is_forwardable(name.as_str()) {
                builder = builder.header(name.clone(), value.clone());
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::BadGateway(e.to_string()))?;
        builder
            .body(Body::from(bytes))
            .map_err(|e| Error::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        for name in ["Connection", "keep-alive", "Transfer-Encoding", "Upgrade", "host"] {
            assert!(!is_forwardable(name), "{name} must not be forwarded");
        }
    }

    #[test]
    fn end_to_end_headers_are_forwarded() {
        for name in ["authorization", "content-type", "x-service-token", "accept"] {
            assert!(is_forwardable(name), "{name} must be forwarded");
        }
    }
}
