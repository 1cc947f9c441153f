//! Local token and password primitives for the fallback tier
//!
//! Session tokens and re-authentication proofs are HS256 JWTs signed with
//! the gateway secret and carry a `purpose` claim so one token class can
//! never be replayed as another. Password verification is an opaque
//! primitive: HMAC-SHA256 over a per-user random salt, compared in constant
//! time. The algorithm choice is deliberately encapsulated here so it can be
//! swapped without touching the orchestrator.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const PURPOSE_SESSION: &str = "session";
const PURPOSE_REAUTH: &str = "reauth";
const SALT_LEN: usize = 16;

/// Claims carried by locally signed tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct LocalClaims {
    /// Subject (normalized email)
    pub sub: String,
    /// Local user ID
    pub uid: i64,
    /// Token class (`session` or `reauth`)
    pub purpose: String,
    /// Expiry (Unix timestamp)
    pub exp: i64,
}

/// Signs and verifies local tokens and password digests.
pub struct AuthCrypto {
    encoding: EncodingKey,
    decoding: DecodingKey,
    session_ttl: Duration,
    reauth_ttl: Duration,
}

impl AuthCrypto {
    /// Build from the shared gateway secret.
    #[must_use]
    pub fn new(secret: &str, session_ttl: Duration, reauth_ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            session_ttl,
            reauth_ttl,
        }
    }

    fn sign(&self, sub: &str, uid: i64, purpose: &str, ttl: Duration) -> Result<String> {
        let ttl = ChronoDuration::from_std(ttl)
            .map_err(|e| Error::Config(format!("invalid token TTL: {e}")))?;
        let claims = LocalClaims {
            sub: sub.to_string(),
            uid,
            purpose: purpose.to_string(),
            exp: (Utc::now() + ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| Error::Internal(format!("token signing failed: {e}")))
    }

    fn verify(&self, token: &str, purpose: &str) -> Result<LocalClaims> {
        let claims = decode::<LocalClaims>(
            token,
            &self.decoding,
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|_| Error::LocalAuth("Invalid or expired token".to_string()))?
        .claims;
        if claims.purpose != purpose {
            return Err(Error::LocalAuth("Invalid or expired token".to_string()));
        }
        Ok(claims)
    }

    /// Mint a session token for a locally authenticated user.
    pub fn issue_session(&self, email: &str, uid: i64) -> Result<String> {
        self.sign(email, uid, PURPOSE_SESSION, self.session_ttl)
    }

    /// Verify a session token and return its claims.
    pub fn verify_session(&self, token: &str) -> Result<LocalClaims> {
        self.verify(token, PURPOSE_SESSION)
    }

    /// Mint a short-lived re-authentication proof.
    pub fn issue_reauth(&self, email: &str, uid: i64) -> Result<String> {
        self.sign(email, uid, PURPOSE_REAUTH, self.reauth_ttl)
    }

    /// Verify a re-authentication proof for the given subject.
    pub fn verify_reauth(&self, token: &str, email: &str) -> Result<LocalClaims> {
        let claims = self.verify(token, PURPOSE_REAUTH)?;
        if claims.sub != email {
            return Err(Error::LocalAuth("Invalid or expired token".to_string()));
        }
        Ok(claims)
    }

    /// Hash a password with a fresh random salt. Format: `hex(salt)$hex(mac)`.
    #[must_use]
    pub fn hash_password(&self, password: &str) -> String {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        format!("{}${}", hex::encode(salt), hex::encode(digest(&salt, password)))
    }

    /// Verify a password against a stored hash in constant time.
    #[must_use]
    pub fn verify_password(&self, password: &str, stored: &str) -> bool {
        let Some((salt_hex, mac_hex)) = stored.split_once('$') else {
            return false;
        };
        let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(mac_hex)) else {
            return false;
        };
        let actual = digest(&salt, password);
        actual.ct_eq(expected.as_slice()).into()
    }

    /// Burn the same work as a real verification without a stored hash, so an
    /// attempt against a nonexistent account takes as long as one against a
    /// real account.
    pub fn dummy_verify(&self, password: &str) {
        let salt = [0u8; SALT_LEN];
        let _ = digest(&salt, password);
    }
}

fn digest(salt: &[u8], password: &str) -> Vec<u8> {
    // Salt as the MAC key keeps the primitive self-contained per user
    let mut mac = HmacSha256::new_from_slice(salt).expect("HMAC accepts any key length");
    mac.update(password.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crypto() -> AuthCrypto {
        AuthCrypto::new(
            "test-secret",
            Duration::from_secs(3600),
            Duration::from_secs(300),
        )
    }

    #[test]
    fn password_round_trip() {
        let crypto = crypto();
        let hash = crypto.hash_password("correct horse");
        assert!(crypto.verify_password("correct horse", &hash));
        assert!(!crypto.verify_password("wrong horse", &hash));
    }

    #[test]
    fn same_password_hashes_differently_per_user() {
        let crypto = crypto();
        let a = crypto.hash_password("shared-password");
        let b = crypto.hash_password("shared-password");
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_stored_hash_never_verifies() {
        let crypto = crypto();
        assert!(!crypto.verify_password("pw", "garbage"));
        assert!(!crypto.verify_password("pw", "nothex$alsonothex"));
    }

    #[test]
    fn session_token_round_trip() {
        let crypto = crypto();
        let token = crypto.issue_session("a@test.com", 42).unwrap();
        let claims = crypto.verify_session(&token).unwrap();
        assert_eq!(claims.sub, "a@test.com");
        assert_eq!(claims.uid, 42);
    }

    #[test]
    fn reauth_proof_is_not_a_session_token() {
        let crypto = crypto();
        let proof = crypto.issue_reauth("a@test.com", 42).unwrap();
        assert!(crypto.verify_session(&proof).is_err());
        crypto.verify_reauth(&proof, "a@test.com").unwrap();
    }

    #[test]
    fn reauth_proof_bound_to_subject() {
        let crypto = crypto();
        let proof = crypto.issue_reauth("a@test.com", 42).unwrap();
        assert!(crypto.verify_reauth(&proof, "b@test.com").is_err());
    }

    #[test]
    fn tampered_token_rejected() {
        let crypto = crypto();
        let token = crypto.issue_session("a@test.com", 1).unwrap();
        let mut tampered = token.clone();
        tampered.push('x');
        assert!(crypto.verify_session(&tampered).is_err());
    }
}
