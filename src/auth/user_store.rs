// User credential storage

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::error::AuthError;
use crate::auth::models::{CredentialRecord, Role};

/// Credential lookup and persistence
///
/// Usernames are unique case-insensitively; lookups ignore case as well.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, subject_id: Uuid) -> Result<Option<CredentialRecord>, AuthError>;

    async fn find_by_username(&self, username: &str)
        -> Result<Option<CredentialRecord>, AuthError>;

    /// Fails with `UsernameTaken` when the username already exists
    async fn create(
        &self,
        username: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<CredentialRecord, AuthError>;

    /// Replace the hash and bump the credential version, but only while the
    /// stored version still equals `expected_version`. Returns whether a
    /// record was updated; an unknown subject or a stale version is `false`.
    async fn update_password_hash(
        &self,
        subject_id: Uuid,
        expected_version: i64,
        password_hash: &str,
    ) -> Result<bool, AuthError>;
}

/// Process-local user store, used in tests and when no database is configured
#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<Uuid, CredentialRecord>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_id(&self, subject_id: Uuid) -> Result<Option<CredentialRecord>, AuthError> {
        Ok(self.users.read().await.get(&subject_id).cloned())
    }

    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<CredentialRecord>, AuthError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|user| user.username.eq_ignore_ascii_case(username))
            .cloned())
    }

    async fn create(
        &self,
        username: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<CredentialRecord, AuthError> {
        // Check and insert under one write lock
        let mut users = self.users.write().await;
        if users
            .values()
            .any(|user| user.username.eq_ignore_ascii_case(username))
        {
            return Err(AuthError::UsernameTaken);
        }

        let record = CredentialRecord {
            subject_id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            role,
            credential_version: 0,
            created_at: Utc::now(),
        };
        users.insert(record.subject_id, record.clone());
        Ok(record)
    }

    async fn update_password_hash(
        &self,
        subject_id: Uuid,
        expected_version: i64,
        password_hash: &str,
    ) -> Result<bool, AuthError> {
        match self.users.write().await.get_mut(&subject_id) {
            Some(user) if user.credential_version == expected_version => {
                user.password_hash = password_hash.to_string();
                user.credential_version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
