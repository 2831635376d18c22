// Refresh token tracking
//
// `RefreshStore` is the keyed backend (memory, PostgreSQL, Redis).
// `RefreshTokenRegistry` adds token verification on top of it, so a token is
// only usable when it is cryptographically valid, unexpired AND stored.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::error::{bounded, AuthError};
use crate::auth::models::RefreshEntry;
use crate::auth::token::{Claims, TokenService};

/// Keyed storage of issued refresh tokens
///
/// Keys are fingerprints, never raw tokens. `remove` must be atomic per key:
/// when two callers race on the same fingerprint exactly one gets `true`.
#[async_trait]
pub trait RefreshStore: Send + Sync {
    async fn insert(&self, entry: RefreshEntry) -> Result<(), AuthError>;

    /// Present and not yet expired
    async fn contains(&self, fingerprint: &str) -> Result<bool, AuthError>;

    /// Remove the entry, returning whether it was present
    async fn remove(&self, fingerprint: &str) -> Result<bool, AuthError>;

    async fn remove_for_subject(&self, subject_id: Uuid) -> Result<u64, AuthError>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError>;
}

/// Hash a token using SHA-256
pub fn fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Process-local refresh store
///
/// A single `RwLock` serializes all writers, which makes `remove` atomic.
#[derive(Default)]
pub struct InMemoryRefreshStore {
    entries: RwLock<HashMap<String, RefreshEntry>>,
}

impl InMemoryRefreshStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl RefreshStore for InMemoryRefreshStore {
    async fn insert(&self, entry: RefreshEntry) -> Result<(), AuthError> {
        self.entries
            .write()
            .await
            .insert(entry.fingerprint.clone(), entry);
        Ok(())
    }

    async fn contains(&self, fingerprint: &str) -> Result<bool, AuthError> {
        let now = Utc::now();
        Ok(self
            .entries
            .read()
            .await
            .get(fingerprint)
            .is_some_and(|entry| !entry.is_expired(now)))
    }

    async fn remove(&self, fingerprint: &str) -> Result<bool, AuthError> {
        let now = Utc::now();
        // An expired entry is removed but does not count as present
        Ok(self
            .entries
            .write()
            .await
            .remove(fingerprint)
            .is_some_and(|entry| !entry.is_expired(now)))
    }

    async fn remove_for_subject(&self, subject_id: Uuid) -> Result<u64, AuthError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.subject_id != subject_id);
        Ok((before - entries.len()) as u64)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok((before - entries.len()) as u64)
    }
}

/// Refresh token lifecycle on top of a `RefreshStore`
#[derive(Clone)]
pub struct RefreshTokenRegistry {
    store: Arc<dyn RefreshStore>,
    tokens: Arc<TokenService>,
    timeout: Duration,
}

impl RefreshTokenRegistry {
    pub fn new(store: Arc<dyn RefreshStore>, tokens: Arc<TokenService>, timeout: Duration) -> Self {
        Self {
            store,
            tokens,
            timeout,
        }
    }

    /// Signature, expiry and purpose only; the store is not consulted
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        self.tokens.validate_refresh_token(token).map_err(|e| {
            debug!("Refresh token rejected: {}", e);
            AuthError::InvalidToken
        })
    }

    /// Record a freshly minted refresh token as usable
    pub async fn register(&self, token: &str) -> Result<(), AuthError> {
        let claims = self.verify(token)?;
        let entry = RefreshEntry {
            fingerprint: fingerprint(token),
            subject_id: claims.sub,
            expires_at: timestamp(claims.exp)?,
            created_at: Utc::now(),
        };
        bounded(self.timeout, "refresh store insert", self.store.insert(entry)).await
    }

    /// Valid signature, unexpired, refresh purpose and present in the store.
    /// Errors only when the store itself fails.
    pub async fn is_valid(&self, token: &str) -> Result<bool, AuthError> {
        if self.verify(token).is_err() {
            return Ok(false);
        }
        let key = fingerprint(token);
        bounded(self.timeout, "refresh store lookup", self.store.contains(&key)).await
    }

    /// Take a token out of the store for rotation.
    ///
    /// Succeeds for exactly one caller per token; later or concurrent callers
    /// get `InvalidToken`.
    pub async fn consume(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = self.verify(token)?;
        let key = fingerprint(token);
        let removed = bounded(self.timeout, "refresh store remove", self.store.remove(&key)).await?;
        if !removed {
            warn!(
                "Refresh token {} for subject {} is revoked or already used",
                &key[..12],
                claims.sub
            );
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }

    /// Revoke one token. Idempotent, and works for tokens that no longer verify.
    pub async fn revoke(&self, token: &str) -> Result<bool, AuthError> {
        let key = fingerprint(token);
        bounded(self.timeout, "refresh store remove", self.store.remove(&key)).await
    }

    /// Revoke every refresh token of a subject
    pub async fn revoke_all(&self, subject_id: Uuid) -> Result<u64, AuthError> {
        let revoked = bounded(
            self.timeout,
            "refresh store remove_for_subject",
            self.store.remove_for_subject(subject_id),
        )
        .await?;
        info!("Revoked {} refresh tokens for subject {}", revoked, subject_id);
        Ok(revoked)
    }

    pub async fn purge_expired(&self) -> Result<u64, AuthError> {
        bounded(
            self.timeout,
            "refresh store purge",
            self.store.purge_expired(Utc::now()),
        )
        .await
    }
}

fn timestamp(seconds: i64) -> Result<DateTime<Utc>, AuthError> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or(AuthError::InvalidToken)
}
