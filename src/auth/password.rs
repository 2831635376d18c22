// Password hashing and validation service

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::{distributions::Alphanumeric, Rng};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use crate::auth::error::{bounded, AuthError};
use crate::config::HashParams;

const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 128;

/// Password service for hashing and verification
///
/// Uses Argon2id. Hashing is CPU-bound, so the async variants run on the
/// blocking pool and are bounded by `timeout`.
#[derive(Clone)]
pub struct PasswordService {
    params: Params,
    timeout: Duration,
    // Hash of a random password, verified against when the user is unknown
    dummy_hash: Arc<str>,
}

impl PasswordService {
    /// Create a new PasswordService with the given Argon2 cost
    pub fn new(cost: HashParams, timeout: Duration) -> Result<Self, AuthError> {
        let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)
            .map_err(|e| AuthError::ConfigError(format!("invalid argon2 parameters: {}", e)))?;

        let decoy: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();

        let mut service = Self {
            params,
            timeout,
            dummy_hash: Arc::from(""),
        };
        service.dummy_hash = Arc::from(service.hash_password(&decoy)?);
        Ok(service)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password using Argon2id (blocking)
    pub fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| {
                error!("Failed to hash password: {}", e);
                AuthError::PasswordHashError
            })
    }

    /// Verify a password against a hash (blocking)
    ///
    /// A wrong password is `Ok(false)`. Only an unparseable stored hash is an error.
    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let parsed_hash = PasswordHash::new(hash).map_err(|_| AuthError::PasswordHashError)?;

        // Cost parameters come from the stored hash, not from self.params
        match self.argon2().verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(_) => Err(AuthError::PasswordHashError),
        }
    }

    /// Hash on the blocking pool
    pub async fn hash_async(&self, password: String) -> Result<String, AuthError> {
        let service = self.clone();
        self.run_blocking("password hashing", move || service.hash_password(&password))
            .await
    }

    /// Verify on the blocking pool
    pub async fn verify_async(&self, password: String, hash: String) -> Result<bool, AuthError> {
        let service = self.clone();
        self.run_blocking("password verification", move || {
            service.verify_password(&password, &hash)
        })
        .await
    }

    /// Spend the same work as a real verification and always fail.
    /// Used for unknown usernames so both login failures cost the same.
    pub async fn verify_dummy(&self, password: String) -> Result<bool, AuthError> {
        let hash = self.dummy_hash.to_string();
        self.verify_async(password, hash).await.map(|_| false)
    }

    async fn run_blocking<T, F>(&self, operation: &str, work: F) -> Result<T, AuthError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, AuthError> + Send + 'static,
    {
        bounded(self.timeout, operation, async move {
            tokio::task::spawn_blocking(work).await.map_err(|e| {
                error!("Password task failed: {}", e);
                AuthError::PasswordHashError
            })?
        })
        .await
    }

    /// Validate password strength requirements
    pub fn validate_password_strength(password: &str) -> Result<(), AuthError> {
        let length = password.chars().count();
        if length < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        if length > MAX_PASSWORD_LEN {
            return Err(AuthError::WeakPassword(format!(
                "Password must be at most {} characters",
                MAX_PASSWORD_LEN
            )));
        }
        if !password.chars().any(|c| c.is_alphabetic()) {
            return Err(AuthError::WeakPassword(
                "Password must contain at least one letter".to_string(),
            ));
        }
        if !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(AuthError::WeakPassword(
                "Password must contain at least one digit".to_string(),
            ));
        }
        Ok(())
    }
}
