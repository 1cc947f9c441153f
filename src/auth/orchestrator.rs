//! Degraded-mode authentication orchestrator
//!
//! Two tiers behind one uniform surface: the remote identity microservice
//! (Tier 1) and the local store (Tier 2). The tier decision hinges on one
//! distinction: a *rejection* from a reachable service is authoritative and
//! never falls through, while *unavailability* (connect failure, timeout,
//! no endpoint in the topology) triggers the fallback unless strict mode
//! pins the remote service as the sole source of truth.
//! Callers can never observe which tier served them.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::identity::schema::{AuthOutcome, TokenBundle};
use crate::identity::{RemoteIdentity, UpstreamError, UserIdentity};
use crate::{Error, Result};

use super::crypto::AuthCrypto;
use super::gate::ThreatGate;
use super::store::{NewUser, StoreError, UserStore};

/// Default role seeded for users created through the fallback tier
const DEFAULT_ROLE: &str = "student";

const INVALID_CREDENTIALS: &str = "Invalid email or password";
const INVALID_TOKEN: &str = "Invalid or expired token";

/// Per-request decision context. Built once per request, never shared.
#[derive(Debug, Clone)]
pub struct AuthDecisionContext {
    /// Normalized email the request concerns
    pub email: String,
    /// Strict-mode flag captured at request start
    pub strict_mode: bool,
    /// Caller IP, forwarded to the remote tier for audit
    pub client_ip: Option<String>,
    /// Caller user agent, forwarded to the remote tier for audit
    pub user_agent: Option<String>,
    /// Request start, for latency accounting
    pub started_at: Instant,
}

impl AuthDecisionContext {
    /// Build a context for `email` under the given mode.
    #[must_use]
    pub fn new(email: &str, strict_mode: bool) -> Self {
        Self {
            email: normalize_email(email),
            strict_mode,
            client_ip: None,
            user_agent: None,
            started_at: Instant::now(),
        }
    }

    /// Attach caller metadata.
    #[must_use]
    pub fn with_client(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.client_ip = ip;
        self.user_agent = user_agent;
        self
    }
}

/// Normalize an email for use as an identity key.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// The two-tier orchestrator. All collaborators are injected; nothing here
/// holds process-wide state.
pub struct AuthOrchestrator {
    remote: Arc<dyn RemoteIdentity>,
    store: Arc<dyn UserStore>,
    gate: Arc<dyn ThreatGate>,
    crypto: AuthCrypto,
    strict_mode: bool,
}

impl AuthOrchestrator {
    /// Wire up an orchestrator.
    #[must_use]
    pub fn new(
        remote: Arc<dyn RemoteIdentity>,
        store: Arc<dyn UserStore>,
        gate: Arc<dyn ThreatGate>,
        crypto: AuthCrypto,
        strict_mode: bool,
    ) -> Self {
        Self {
            remote,
            store,
            gate,
            crypto,
            strict_mode,
        }
    }

    /// Build a decision context under the orchestrator's mode.
    #[must_use]
    pub fn context(&self, email: &str) -> AuthDecisionContext {
        AuthDecisionContext::new(email, self.strict_mode)
    }

    /// Whether an upstream failure may reach the fallback tier.
    fn may_fall_back(&self, error: &UpstreamError) -> bool {
        !self.strict_mode && error.is_unavailable()
    }

    /// Register a new user.
    ///
    /// Tier 1 first; unavailability falls back to a local record (non-strict
    /// only). The remote attempt is never retried within one call.
    pub async fn register(
        &self,
        full_name: &str,
        email: &str,
        password: &str,
        ctx: &AuthDecisionContext,
    ) -> Result<UserIdentity> {
        let email = normalize_email(email);
        match self.remote.register(full_name, &email, password).await {
            Ok(user) => Ok(user.normalize()),
            Err(error) if self.may_fall_back(&error) => {
                warn!(
                    email = %email,
                    client_ip = ctx.client_ip.as_deref().unwrap_or("-"),
                    error = %error,
                    "Identity service unavailable, registering locally"
                );
                self.register_local(full_name, &email, password).await
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn register_local(
        &self,
        full_name: &str,
        email: &str,
        password: &str,
    ) -> Result<UserIdentity> {
        let user = NewUser {
            email: email.to_string(),
            full_name: full_name.to_string(),
            password_hash: self.crypto.hash_password(password),
            roles: vec![DEFAULT_ROLE.to_string()],
        };
        match self.store.insert(user).await {
            Ok(record) => {
                info!(email = %email, id = record.id, "User registered via fallback tier");
                Ok(record.to_identity())
            }
            Err(StoreError::DuplicateEmail) => {
                Err(Error::Invalid("Email already registered".to_string()))
            }
        }
    }

    /// Authenticate and mint tokens.
    ///
    /// The gate is consulted before any verification, regardless of tier.
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
        ctx: &AuthDecisionContext,
    ) -> Result<AuthOutcome> {
        let email = normalize_email(email);
        self.gate.check_allowance(&email)?;

        match self
            .remote
            .login(
                &email,
                password,
                ctx.user_agent.as_deref(),
                ctx.client_ip.as_deref(),
            )
            .await
        {
            Ok(payload) => {
                self.gate.reset(&email);
                Ok(AuthOutcome {
                    user: payload.user.normalize(),
                    tokens: TokenBundle {
                        access_token: payload.access_token,
                        refresh_token: payload.refresh_token,
                        token_type: payload.token_type,
                    },
                })
            }
            Err(error) if self.may_fall_back(&error) => {
                warn!(email = %email, error = %error, "Identity service unavailable, authenticating locally");
                self.authenticate_local(&email, password).await
            }
            Err(error) => {
                if matches!(error, UpstreamError::Rejected { status: 401, .. }) {
                    self.gate.record_failure(&email);
                }
                Err(error.into())
            }
        }
    }

    async fn authenticate_local(&self, email: &str, password: &str) -> Result<AuthOutcome> {
        let Some(user) = self.store.find_by_email(email).await else {
            // Same cost as a real verification so absence is not observable
            self.crypto.dummy_verify(password);
            self.gate.record_failure(email);
            return Err(Error::LocalAuth(INVALID_CREDENTIALS.to_string()));
        };
        if !self.crypto.verify_password(password, &user.password_hash) {
            self.gate.record_failure(email);
            return Err(Error::LocalAuth(INVALID_CREDENTIALS.to_string()));
        }
        if !user.is_active {
            return Err(Error::LocalAuth("Account is inactive".to_string()));
        }
        self.gate.reset(email);
        let token = self.crypto.issue_session(&user.email, user.id)?;
        Ok(AuthOutcome {
            user: user.to_identity(),
            tokens: TokenBundle {
                access_token: token,
                refresh_token: None,
                token_type: "Bearer".to_string(),
            },
        })
    }

    /// Resolve the user behind a bearer token.
    ///
    /// Locally signed session tokens are verified without a network hop;
    /// anything else goes to the remote tier. Strict mode skips the local
    /// path entirely.
    pub async fn current_user(&self, token: &str) -> Result<UserIdentity> {
        if !self.strict_mode {
            if let Ok(claims) = self.crypto.verify_session(token) {
                return match self.store.find_by_email(&claims.sub).await {
                    Some(user) => Ok(user.to_identity()),
                    None => Err(Error::LocalAuth(INVALID_TOKEN.to_string())),
                };
            }
        }
        match self.remote.get_me(token).await {
            Ok(user) => Ok(user.normalize()),
            Err(error) => Err(error.into()),
        }
    }

    /// Change the caller's password. Tier 1 only: password hashes live in the
    /// identity service, so unavailability is a hard 503 in both modes.
    pub async fn change_password(
        &self,
        token: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<()> {
        self.remote
            .change_password(token, current_password, new_password)
            .await
            .map_err(Error::from)
    }

    /// Re-verify the password of an already resolved user. Same tier rules
    /// as login: Tier 1 first, local hash only on unavailability, rejection
    /// from a reachable service is final.
    async fn reverify_password(
        &self,
        user: &UserIdentity,
        password: &str,
        ctx: &AuthDecisionContext,
    ) -> Result<()> {
        self.gate.check_allowance(&user.email)?;

        match self
            .remote
            .login(
                &user.email,
                password,
                ctx.user_agent.as_deref(),
                ctx.client_ip.as_deref(),
            )
            .await
        {
            Ok(_) => {
                self.gate.reset(&user.email);
                Ok(())
            }
            Err(error) if self.may_fall_back(&error) => {
                let Some(record) = self.store.find_by_email(&user.email).await else {
                    // No local hash to check against: cannot degrade further
                    return Err(error.into());
                };
                if self.crypto.verify_password(password, &record.password_hash) {
                    self.gate.reset(&user.email);
                    Ok(())
                } else {
                    self.gate.record_failure(&user.email);
                    Err(Error::LocalAuth(INVALID_CREDENTIALS.to_string()))
                }
            }
            Err(error) => {
                if matches!(error, UpstreamError::Rejected { status: 401, .. }) {
                    self.gate.record_failure(&user.email);
                    return Err(Error::LocalAuth(INVALID_CREDENTIALS.to_string()));
                }
                Err(error.into())
            }
        }
    }

    /// Issue a short-lived re-authentication proof after re-verifying the
    /// caller's password. Privileged operations demand this proof on top of
    /// a valid session.
    pub async fn issue_reauth_proof(
        &self,
        user: &UserIdentity,
        password: &str,
        ctx: &AuthDecisionContext,
    ) -> Result<String> {
        self.reverify_password(user, password, ctx).await?;
        self.crypto.issue_reauth(&user.email, user.id)
    }

    /// Admit a privileged operation for `user`. Accepts either a previously
    /// issued proof or the caller's password for an inline re-verification;
    /// with neither the operation is refused outright.
    pub async fn enforce_reauth(
        &self,
        user: &UserIdentity,
        proof: Option<&str>,
        password: Option<&str>,
        ctx: &AuthDecisionContext,
    ) -> Result<()> {
        if let Some(proof) = proof {
            return self.verify_reauth_proof(proof, &user.email);
        }
        if let Some(password) = password {
            return self.reverify_password(user, password, ctx).await;
        }
        Err(Error::LocalAuth("Re-authentication required".to_string()))
    }

    /// Verify a re-authentication proof presented for `email`.
    pub fn verify_reauth_proof(&self, proof: &str, email: &str) -> Result<()> {
        self.crypto
            .verify_reauth(proof, &normalize_email(email))
            .map(|_| ())
    }
}
