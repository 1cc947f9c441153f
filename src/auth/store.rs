//! Local user persistence for the fallback tier
//!
//! The store enforces email uniqueness itself: insertion is atomic
//! insert-if-absent, so two concurrent registrations for the same email can
//! never both succeed, without any check-then-act window at the caller.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;

use crate::identity::UserIdentity;

/// A user record as held by the local tier.
#[derive(Debug, Clone)]
pub struct LocalUser {
    /// Local user ID
    pub id: i64,
    /// Normalized (lowercased, trimmed) email
    pub email: String,
    /// Display name
    pub full_name: String,
    /// Opaque password hash (see `AuthCrypto`)
    pub password_hash: String,
    /// Whether the account is enabled
    pub is_active: bool,
    /// Account status
    pub status: String,
    /// Assigned role names
    pub roles: Vec<String>,
}

impl LocalUser {
    /// Project into the tier-neutral identity shape.
    #[must_use]
    pub fn to_identity(&self) -> UserIdentity {
        UserIdentity {
            id: self.id,
            email: self.email.clone(),
            full_name: self.full_name.clone(),
            is_active: self.is_active,
            status: self.status.clone(),
            roles: self.roles.clone(),
        }
    }
}

/// Store-level failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// The email is already registered
    #[error("Email already registered")]
    DuplicateEmail,
}

/// New-user fields; the store assigns the ID.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Normalized email
    pub email: String,
    /// Display name
    pub full_name: String,
    /// Opaque password hash
    pub password_hash: String,
    /// Seeded role names
    pub roles: Vec<String>,
}

/// Persistence seam for the fallback tier.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new user; fails if the email is taken. Atomic with respect to
    /// concurrent inserts for the same email.
    async fn insert(&self, user: NewUser) -> Result<LocalUser, StoreError>;

    /// Look up by normalized email.
    async fn find_by_email(&self, email: &str) -> Option<LocalUser>;

    /// Look up by local ID.
    async fn find_by_id(&self, id: i64) -> Option<LocalUser>;
}

/// In-memory store: the default backing for degraded-mode operation.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: DashMap<String, LocalUser>,
    next_id: AtomicI64,
}

impl MemoryUserStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, user: NewUser) -> Result<LocalUser, StoreError> {
        match self.users.entry(user.email.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateEmail),
            Entry::Vacant(slot) => {
                let record = LocalUser {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed),
                    email: user.email,
                    full_name: user.full_name,
                    password_hash: user.password_hash,
                    is_active: true,
                    status: "active".to_string(),
                    roles: user.roles,
                };
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn find_by_email(&self, email: &str) -> Option<LocalUser> {
        self.users.get(email).map(|u| u.clone())
    }

    async fn find_by_id(&self, id: i64) -> Option<LocalUser> {
        self.users.iter().find(|u| u.id == id).map(|u| u.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            full_name: "Tester".to_string(),
            password_hash: "salt$mac".to_string(),
            roles: vec!["student".to_string()],
        }
    }

    #[tokio::test]
    async fn insert_then_find() {
        let store = MemoryUserStore::new();
        let created = store.insert(new_user("a@test.com")).await.unwrap();
        assert!(created.is_active);
        assert_eq!(created.status, "active");

        let found = store.find_by_email("a@test.com").await.unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(store.find_by_id(created.id).await.unwrap().email, found.email);
    }

    #[tokio::test]
    async fn duplicate_email_rejected() {
        let store = MemoryUserStore::new();
        store.insert(new_user("a@test.com")).await.unwrap();
        let err = store.insert(new_user("a@test.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
    }

    #[tokio::test]
    async fn concurrent_inserts_for_one_email_yield_one_record() {
        let store = Arc::new(MemoryUserStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.insert(new_user("race@test.com")).await.is_ok()
            }));
        }
        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }
}
