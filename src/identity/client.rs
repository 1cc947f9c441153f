//! Upstream client for the identity microservice
//!
//! Each logical operation can live at one of several candidate paths while
//! the deployment migrates (direct service route, versioned API route,
//! gateway security route). [`IdentityClient::call_with_fallback`] probes
//! candidates in priority order, treats a 404 as "this path does not exist
//! in the current topology, try the next one", treats any other non-2xx as
//! the operation's authoritative outcome, and memoizes the winning path.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use super::credential::ServiceCredential;
use super::resolver::EndpointResolver;
use super::schema::{AuthPayload, RegisterPayload, RemoteUser};
use super::transport::{OutboundRequest, OutboundResponse, Transport, TransportError};

/// Header carrying the internal service credential
pub const SERVICE_TOKEN_HEADER: &str = "X-Service-Token";

/// Failure classes an upstream call can produce. Callers react differently
/// to "the service said no" and "the service could not be reached", so the
/// two are never conflated.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Application-level rejection from a reachable service: authoritative,
    /// never a fallback trigger.
    #[error("upstream rejected ({status}): {detail}")]
    Rejected {
        /// Original status code
        status: u16,
        /// Error detail from the response body
        detail: String,
    },
    /// The service could not be reached (connect failure or timeout).
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
    /// Every candidate path returned 404: the operation does not exist
    /// anywhere in the current deployment topology.
    #[error("no endpoint for operation '{0}' in current topology")]
    EndpointMissing(String),
    /// The service answered 2xx but the payload did not match the schema.
    #[error("malformed upstream payload: {0}")]
    Malformed(String),
}

impl UpstreamError {
    /// Whether this failure is eligible for the local fallback tier.
    /// Only unavailability qualifies; a rejection is an answer.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::EndpointMissing(_))
    }
}

impl From<UpstreamError> for crate::Error {
    fn from(e: UpstreamError) -> Self {
        match e {
            UpstreamError::Rejected { status, detail } => {
                crate::Error::UpstreamRejected { status, detail }
            }
            UpstreamError::Unavailable(msg) => crate::Error::UpstreamUnavailable(msg),
            UpstreamError::EndpointMissing(op) => {
                crate::Error::UpstreamUnavailable(format!("no endpoint for {op}"))
            }
            UpstreamError::Malformed(msg) => crate::Error::Internal(msg),
        }
    }
}

/// Identity operations the auth orchestrator depends on. The trait seam
/// exists so the orchestrator can be driven by a test double instead of a
/// live client.
#[async_trait]
pub trait RemoteIdentity: Send + Sync {
    /// Register a new user.
    async fn register(
        &self,
        full_name: &str,
        email: &str,
        password: &str,
    ) -> Result<RemoteUser, UpstreamError>;

    /// Authenticate and obtain tokens.
    async fn login(
        &self,
        email: &str,
        password: &str,
        user_agent: Option<&str>,
        ip: Option<&str>,
    ) -> Result<AuthPayload, UpstreamError>;

    /// Resolve the current user from a bearer token.
    async fn get_me(&self, token: &str) -> Result<RemoteUser, UpstreamError>;

    /// Change the current user's password.
    async fn change_password(
        &self,
        token: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), UpstreamError>;
}

/// HTTP client for the identity microservice.
///
/// Constructed once at startup and injected where needed; the preferred-path
/// cache lives on the instance, not in a process-wide global.
pub struct IdentityClient {
    base_url: String,
    transport: Arc<dyn Transport>,
    resolver: EndpointResolver,
    credential: ServiceCredential,
}

impl IdentityClient {
    /// Create a client against `base_url`.
    #[must_use]
    pub fn new(base_url: &str, transport: Arc<dyn Transport>, credential: ServiceCredential) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
            resolver: EndpointResolver::new(),
            credential,
        }
    }

    /// Candidate paths for a credential operation (`login`, `register`,
    /// `password/reset`, ...), in priority order: the versioned API route,
    /// the service's bare `/auth` route, then the gateway security route
    /// kept for migration compatibility.
    #[must_use]
    pub fn auth_candidates(suffix: &str) -> Vec<String> {
        vec![
            format!("/api/v1/auth/{suffix}"),
            format!("/auth/{suffix}"),
            format!("/api/security/{suffix}"),
        ]
    }

    /// Candidate paths for a resource operation (`user/me`, `admin/users`,
    /// ...). Same priority order, but the service's bare route is the path
    /// itself rather than an `/auth` subpath.
    #[must_use]
    pub fn resource_candidates(path: &str) -> Vec<String> {
        vec![
            format!("/api/v1/{path}"),
            format!("/{path}"),
            format!("/api/security/{path}"),
        ]
    }

    /// Probe `candidates` for operation `op` until one answers.
    ///
    /// - 404 at candidate *i* → try candidate *i+1*
    /// - any other non-2xx → authoritative rejection, no further candidates
    /// - connect/timeout → distinct unavailable error, no further candidates
    /// - all candidates 404 → synthesized endpoint-missing error
    ///
    /// On success the winning path is remembered so the next call for the
    /// same operation tries it first.
    pub async fn call_with_fallback(
        &self,
        method: Method,
        op: &str,
        candidates: &[String],
        payload: Option<Value>,
        bearer: Option<&str>,
        extra_headers: &[(String, String)],
    ) -> Result<OutboundResponse, UpstreamError> {
        let ordered = self.resolver.resolve(op, candidates);

        let service_token = self
            .credential
            .token()
            .map_err(|e| UpstreamError::Unavailable(format!("credential minting failed: {e}")))?;

        for path in &ordered {
            let mut headers = vec![(SERVICE_TOKEN_HEADER.to_string(), service_token.clone())];
            if let Some(token) = bearer {
                headers.push(("Authorization".to_string(), format!("Bearer {token}")));
            }
            headers.extend(extra_headers.iter().cloned());

            let request = OutboundRequest {
                method: method.clone(),
                url: format!("{}{path}", self.base_url),
                headers,
                body: payload.clone(),
            };

            match self.transport.send(request).await {
                Ok(response) if response.is_success() => {
                    debug!(operation = %op, path = %path, "Identity call succeeded");
                    self.resolver.remember(op, path);
                    return Ok(response);
                }
                Ok(response) if response.status == 404 => {
                    debug!(operation = %op, path = %path, "Path absent, trying next candidate");
                }
                Ok(response) => {
                    warn!(
                        operation = %op,
                        path = %path,
                        status = response.status,
                        "Identity service rejected operation"
                    );
                    return Err(UpstreamError::Rejected {
                        status: response.status,
                        detail: response
                            .detail()
                            .unwrap_or_else(|| format!("identity service returned {}", response.status)),
                    });
                }
                Err(TransportError::Connect(msg)) | Err(TransportError::Timeout(msg)) => {
                    warn!(operation = %op, path = %path, error = %msg, "Identity service unreachable");
                    return Err(UpstreamError::Unavailable(msg));
                }
            }
        }

        Err(UpstreamError::EndpointMissing(op.to_string()))
    }

    // ── Session operations ─────────────────────────────────────────────

    /// Refresh a session from a refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthPayload, UpstreamError> {
        let response = self
            .call_with_fallback(
                Method::POST,
                "refresh",
                &Self::auth_candidates("refresh"),
                Some(json!({"refresh_token": refresh_token})),
                None,
                &[],
            )
            .await?;
        decode(response.body)
    }

    /// Invalidate a refresh token. Best effort: a rejection here is still
    /// surfaced, but callers typically ignore it.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), UpstreamError> {
        self.call_with_fallback(
            Method::POST,
            "logout",
            &Self::auth_candidates("logout"),
            Some(json!({"refresh_token": refresh_token})),
            None,
            &[],
        )
        .await?;
        Ok(())
    }

    /// Verify a token's validity without resolving the user.
    pub async fn verify_token(&self, token: &str) -> Result<bool, UpstreamError> {
        let response = self
            .call_with_fallback(
                Method::POST,
                "token/verify",
                &Self::auth_candidates("token/verify"),
                Some(json!({"token": token})),
                None,
                &[],
            )
            .await?;
        Ok(response
            .body
            .pointer("/data/valid")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    // ── Profile operations ─────────────────────────────────────────────

    /// Update the current user's profile fields.
    pub async fn update_profile(
        &self,
        token: &str,
        full_name: Option<&str>,
        email: Option<&str>,
    ) -> Result<RemoteUser, UpstreamError> {
        let mut payload = serde_json::Map::new();
        if let Some(name) = full_name {
            payload.insert("full_name".to_string(), json!(name));
        }
        if let Some(email) = email {
            payload.insert("email".to_string(), json!(email));
        }
        let response = self
            .call_with_fallback(
                Method::PATCH,
                "users/me",
                &Self::resource_candidates("users/me"),
                Some(Value::Object(payload)),
                Some(token),
                &[],
            )
            .await?;
        decode(response.body)
    }

    /// Request a password reset token for `email`.
    pub async fn forgot_password(&self, email: &str) -> Result<OutboundResponse, UpstreamError> {
        self.call_with_fallback(
            Method::POST,
            "password/forgot",
            &Self::auth_candidates("password/forgot"),
            Some(json!({"email": email})),
            None,
            &[],
        )
        .await
    }

    /// Apply a password reset.
    pub async fn reset_password(
        &self,
        reset_token: &str,
        new_password: &str,
    ) -> Result<(), UpstreamError> {
        self.call_with_fallback(
            Method::POST,
            "password/reset",
            &Self::auth_candidates("password/reset"),
            Some(json!({"token": reset_token, "new_password": new_password})),
            None,
            &[],
        )
        .await?;
        Ok(())
    }

    // ── Admin operations ───────────────────────────────────────────────

    /// List users (admin).
    pub async fn list_users(&self, token: &str) -> Result<Vec<RemoteUser>, UpstreamError> {
        let response = self
            .call_with_fallback(
                Method::GET,
                "admin/users",
                &Self::resource_candidates("admin/users"),
                None,
                Some(token),
                &[],
            )
            .await?;
        decode(response.body)
    }

    /// Create a user as an administrator.
    pub async fn create_user_admin(
        &self,
        token: &str,
        full_name: &str,
        email: &str,
        password: &str,
        is_admin: bool,
    ) -> Result<RemoteUser, UpstreamError> {
        let response = self
            .call_with_fallback(
                Method::POST,
                "admin/users",
                &Self::resource_candidates("admin/users"),
                Some(json!({
                    "full_name": full_name,
                    "email": email,
                    "password": password,
                    "is_admin": is_admin,
                })),
                Some(token),
                &[],
            )
            .await?;
        decode(response.body)
    }

    /// Update a user's account status (admin).
    pub async fn update_user_status(
        &self,
        token: &str,
        user_id: i64,
        status: &str,
    ) -> Result<RemoteUser, UpstreamError> {
        let response = self
            .call_with_fallback(
                Method::PATCH,
                "admin/users/status",
                &Self::resource_candidates(&format!("admin/users/{user_id}/status")),
                Some(json!({"status": status})),
                Some(token),
                &[],
            )
            .await?;
        decode(response.body)
    }

    /// Assign a role to a user (admin).
    pub async fn assign_role(
        &self,
        token: &str,
        user_id: i64,
        role_name: &str,
        justification: Option<&str>,
    ) -> Result<RemoteUser, UpstreamError> {
        let response = self
            .call_with_fallback(
                Method::POST,
                "admin/users/roles",
                &Self::resource_candidates(&format!("admin/users/{user_id}/roles")),
                Some(json!({"role_name": role_name, "justification": justification})),
                Some(token),
                &[],
            )
            .await?;
        decode(response.body)
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, UpstreamError> {
    serde_json::from_value(body).map_err(|e| UpstreamError::Malformed(e.to_string()))
}

#[async_trait]
impl RemoteIdentity for IdentityClient {
    async fn register(
        &self,
        full_name: &str,
        email: &str,
        password: &str,
    ) -> Result<RemoteUser, UpstreamError> {
        let response = self
            .call_with_fallback(
                Method::POST,
                "register",
                &Self::auth_candidates("register"),
                Some(json!({
                    "full_name": full_name,
                    "email": email,
                    "password": password,
                })),
                None,
                &[],
            )
            .await?;
        let payload: RegisterPayload = decode(response.body)?;
        Ok(payload.into_user())
    }

    async fn login(
        &self,
        email: &str,
        password: &str,
        user_agent: Option<&str>,
        ip: Option<&str>,
    ) -> Result<AuthPayload, UpstreamError> {
        let mut extra = Vec::new();
        if let Some(agent) = user_agent {
            extra.push(("User-Agent".to_string(), agent.to_string()));
        }
        if let Some(ip) = ip {
            extra.push(("X-Forwarded-For".to_string(), ip.to_string()));
        }
        let response = self
            .call_with_fallback(
                Method::POST,
                "login",
                &Self::auth_candidates("login"),
                Some(json!({"email": email, "password": password})),
                None,
                &extra,
            )
            .await?;
        decode(response.body)
    }

    async fn get_me(&self, token: &str) -> Result<RemoteUser, UpstreamError> {
        let response = self
            .call_with_fallback(
                Method::GET,
                "user/me",
                &Self::resource_candidates("user/me"),
                None,
                Some(token),
                &[],
            )
            .await?;
        decode(response.body)
    }

    async fn change_password(
        &self,
        token: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), UpstreamError> {
        self.call_with_fallback(
            Method::POST,
            "users/me/change-password",
            &Self::resource_candidates("users/me/change-password"),
            Some(json!({
                "current_password": current_password,
                "new_password": new_password,
            })),
            Some(token),
            &[],
        )
        .await?;
        Ok(())
    }
}
