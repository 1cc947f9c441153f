//! Error types for the education gateway

use std::io;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (fatal at startup, never per-request)
    #[error("Configuration error: {0}")]
    Config(String),

    /// No route table entry matches the request path
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    /// Connection/timeout failure talking to a resolved backend
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A well-formed error response from a reachable backend. Authoritative:
    /// never retried and never a fallback trigger.
    #[error("Upstream rejected ({status}): {detail}")]
    UpstreamRejected {
        /// Original status code from the backend
        status: u16,
        /// Message safe to expose to the caller
        detail: String,
    },

    /// The local fallback tier itself failed (token decode, store error)
    #[error("Authentication failed: {0}")]
    LocalAuth(String),

    /// The threat gate denied the attempt (lockout or burst ceiling)
    #[error("Too many attempts: {0}")]
    TooManyAttempts(String),

    /// Request-level validation failure (duplicate email, malformed input)
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// A proxied backend could not be reached
    #[error("Bad gateway: {0}")]
    BadGateway(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// User-visible status for this error.
    ///
    /// The mapping never reveals which tier served a request: remote
    /// rejections keep their original status, unavailability is uniformly a
    /// 503, and local auth failures look identical to remote ones.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RouteNotFound(_) => StatusCode::NOT_FOUND,
            Self::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamRejected { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::LocalAuth(_) => StatusCode::UNAUTHORIZED,
            Self::TooManyAttempts(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Invalid(_) => StatusCode::BAD_REQUEST,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) | Self::Io(_) | Self::Json(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Detail string safe to expose to external callers.
    #[must_use]
    pub fn public_detail(&self) -> String {
        match self {
            Self::RouteNotFound(path) => format!("Route not found: {path}"),
            Self::UpstreamUnavailable(_) => "Authentication service unavailable".to_string(),
            Self::UpstreamRejected { detail, .. } => detail.clone(),
            Self::LocalAuth(msg) => msg.clone(),
            Self::TooManyAttempts(msg) => msg.clone(),
            Self::Invalid(msg) => msg.clone(),
            Self::BadGateway(_) => "Upstream service unavailable".to_string(),
            // Internal classes never leak their cause
            _ => "Internal server error".to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            Self::UpstreamUnavailable(e.to_string())
        } else {
            Self::Internal(e.to_string())
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({ "detail": self.public_detail() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_keeps_original_status() {
        let err = Error::UpstreamRejected {
            status: 409,
            detail: "Email already registered".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.public_detail(), "Email already registered");
    }

    #[test]
    fn unavailable_maps_to_503_with_uniform_detail() {
        let err = Error::UpstreamUnavailable("connection refused to 10.0.0.3".to_string());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        // The raw cause (topology) is never exposed
        assert_eq!(err.public_detail(), "Authentication service unavailable");
    }

    #[test]
    fn internal_errors_do_not_leak_cause() {
        let err = Error::Internal("secret key misconfigured".to_string());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_detail(), "Internal server error");
    }
}
