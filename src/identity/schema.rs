//! Typed schemas for identity-service payloads
//!
//! Remote responses are decoded once at the client boundary and normalized
//! into [`UserIdentity`]; the rest of the system never branches on which
//! tier (remote microservice or local fallback) produced a user.

use serde::{Deserialize, Serialize};

/// Normalized user shape returned by every identity operation, regardless of
/// the tier that served it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Stable user ID
    pub id: i64,
    /// Normalized email
    pub email: String,
    /// Display name
    pub full_name: String,
    /// Whether the account is enabled
    pub is_active: bool,
    /// Account status (`active`, `suspended`, ...)
    pub status: String,
    /// Assigned role names
    pub roles: Vec<String>,
}

/// User payload as the identity microservice ships it. Field names drifted
/// across service versions (`full_name` vs `name`), so both are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteUser {
    /// User ID
    pub id: i64,
    /// Email address
    pub email: String,
    /// Preferred name field
    #[serde(default)]
    pub full_name: Option<String>,
    /// Older name field
    #[serde(default)]
    pub name: Option<String>,
    /// Active flag (absent means active)
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Account status (absent means active)
    #[serde(default)]
    pub status: Option<String>,
    /// Role names
    #[serde(default)]
    pub roles: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl RemoteUser {
    /// Normalize into the single [`UserIdentity`] shape.
    ///
    /// Name resolution order: `full_name`, then `name`, then the email local
    /// part. The last is a stable default so older service versions that
    /// omit the name do not break login.
    #[must_use]
    pub fn normalize(self) -> UserIdentity {
        let full_name = self
            .full_name
            .filter(|n| !n.is_empty())
            .or(self.name.filter(|n| !n.is_empty()))
            .unwrap_or_else(|| {
                self.email
                    .split('@')
                    .next()
                    .unwrap_or_default()
                    .to_string()
            });
        UserIdentity {
            id: self.id,
            email: self.email,
            full_name,
            is_active: self.is_active,
            status: self.status.unwrap_or_else(|| "active".to_string()),
            roles: self.roles,
        }
    }
}

/// Successful login/register response from the identity service.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthPayload {
    /// Access token issued by the remote tier
    pub access_token: String,
    /// Refresh token, when the endpoint issues one
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Token type, normally `Bearer`
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// The authenticated user
    pub user: RemoteUser,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Register response: some service versions return the user directly, some
/// wrap it in `{status, message, user}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RegisterPayload {
    /// Wrapped shape
    Wrapped {
        /// Created user
        user: RemoteUser,
    },
    /// Bare user shape
    Bare(RemoteUser),
}

impl RegisterPayload {
    /// Unwrap into the user payload
    #[must_use]
    pub fn into_user(self) -> RemoteUser {
        match self {
            Self::Wrapped { user } | Self::Bare(user) => user,
        }
    }
}

/// Session tokens as returned to external callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBundle {
    /// Access token
    pub access_token: String,
    /// Refresh token (absent on the local tier, which issues none)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Token type
    pub token_type: String,
}

/// Result of an authenticate/register operation: the normalized user plus
/// the tokens that go back to the caller.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    /// Normalized user
    pub user: UserIdentity,
    /// Tokens for the caller
    pub tokens: TokenBundle,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn full_name_preferred_over_name() {
        let user: RemoteUser = serde_json::from_value(json!({
            "id": 1, "email": "a@test.com", "full_name": "Full", "name": "Short"
        }))
        .unwrap();
        assert_eq!(user.normalize().full_name, "Full");
    }

    #[test]
    fn name_field_used_when_full_name_missing() {
        let user: RemoteUser = serde_json::from_value(json!({
            "id": 2, "email": "b@test.com", "name": "Remote Name"
        }))
        .unwrap();
        assert_eq!(user.normalize().full_name, "Remote Name");
    }

    #[test]
    fn email_prefix_is_the_stable_default_name() {
        let user: RemoteUser = serde_json::from_value(json!({
            "id": 3, "email": "fallback-name@test.com"
        }))
        .unwrap();
        let identity = user.normalize();
        assert_eq!(identity.full_name, "fallback-name");
        assert_eq!(identity.status, "active");
        assert!(identity.is_active);
    }

    #[test]
    fn register_payload_accepts_wrapped_and_bare_shapes() {
        let wrapped: RegisterPayload = serde_json::from_value(json!({
            "status": "success",
            "message": "created",
            "user": {"id": 7, "email": "w@test.com"}
        }))
        .unwrap();
        assert_eq!(wrapped.into_user().id, 7);

        let bare: RegisterPayload =
            serde_json::from_value(json!({"id": 8, "email": "b@test.com"})).unwrap();
        assert_eq!(bare.into_user().id, 8);
    }

    #[test]
    fn auth_payload_defaults_token_type() {
        let payload: AuthPayload = serde_json::from_value(json!({
            "access_token": "tok",
            "user": {"id": 9, "email": "c@test.com"}
        }))
        .unwrap();
        assert_eq!(payload.token_type, "Bearer");
        assert!(payload.refresh_token.is_none());
    }
}
