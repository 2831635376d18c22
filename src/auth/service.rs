// Session manager - business logic layer
//
// Per session: Anonymous -> Authenticated (login/register) -> Refreshed
// (rotation, repeatable) -> Revoked (logout, logout-all, password reset).

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{
    error::{bounded, AuthError},
    models::{AuthResponse, CredentialRecord, ResetTokenResponse, Role, TokenPair, UserResponse},
    password::PasswordService,
    refresh_store::{RefreshStore, RefreshTokenRegistry},
    token::{TokenPurpose, TokenService},
    user_store::UserStore,
};
use crate::config::AuthConfig;

/// Coordinates credential checks, token issuance and refresh token lifecycle
pub struct SessionManager {
    users: Arc<dyn UserStore>,
    refresh_tokens: RefreshTokenRegistry,
    passwords: PasswordService,
    tokens: Arc<TokenService>,
    store_timeout: Duration,
}

impl SessionManager {
    pub fn new(
        users: Arc<dyn UserStore>,
        refresh_store: Arc<dyn RefreshStore>,
        passwords: PasswordService,
        tokens: Arc<TokenService>,
        store_timeout: Duration,
    ) -> Self {
        let refresh_tokens = RefreshTokenRegistry::new(refresh_store, tokens.clone(), store_timeout);
        Self {
            users,
            refresh_tokens,
            passwords,
            tokens,
            store_timeout,
        }
    }

    /// Build the token and password services from configuration
    pub fn from_config(
        config: &AuthConfig,
        users: Arc<dyn UserStore>,
        refresh_store: Arc<dyn RefreshStore>,
    ) -> Result<Self, AuthError> {
        let passwords = PasswordService::new(config.hash_params, config.hash_timeout)?;
        let tokens = Arc::new(TokenService::new(config));
        Ok(Self::new(
            users,
            refresh_store,
            passwords,
            tokens,
            config.store_timeout,
        ))
    }

    pub fn token_service(&self) -> Arc<TokenService> {
        self.tokens.clone()
    }

    async fn find_user_by_name(&self, username: &str) -> Result<Option<CredentialRecord>, AuthError> {
        bounded(
            self.store_timeout,
            "user lookup",
            self.users.find_by_username(username),
        )
        .await
    }

    async fn find_user_by_id(&self, subject_id: Uuid) -> Result<Option<CredentialRecord>, AuthError> {
        bounded(self.store_timeout, "user lookup", self.users.find_by_id(subject_id)).await
    }

    /// Mint a token pair and record the refresh half
    async fn issue_tokens(&self, user: &CredentialRecord) -> Result<TokenPair, AuthError> {
        let pair = self
            .tokens
            .generate_token_pair(user.identity(), user.credential_version)?;
        self.refresh_tokens.register(&pair.refresh_token).await?;
        Ok(pair)
    }

    /// Drop a refresh token nobody should hold. Failures are only logged.
    async fn discard(&self, refresh_token: &str) {
        if let Err(e) = self.refresh_tokens.revoke(refresh_token).await {
            warn!("Could not discard refresh token: {}", e);
        }
    }

    /// Register a new user with role `user` and start a session
    pub async fn register(&self, username: &str, password: &str) -> Result<AuthResponse, AuthError> {
        PasswordService::validate_password_strength(password)?;

        let password_hash = self.passwords.hash_async(password.to_string()).await?;
        let user = bounded(
            self.store_timeout,
            "user create",
            self.users.create(username, &password_hash, Role::User),
        )
        .await?;
        info!("Registered user {}", user.subject_id);

        let tokens = self.issue_tokens(&user).await?;
        Ok(AuthResponse {
            tokens,
            user: user.into(),
        })
    }

    /// Authenticate with username and password
    ///
    /// Unknown usernames still pay for one password verification so both
    /// failure paths look the same from outside.
    pub async fn login(&self, username: &str, password: &str) -> Result<AuthResponse, AuthError> {
        let user = self.find_user_by_name(username).await?;

        let verified = match &user {
            Some(user) => {
                self.passwords
                    .verify_async(password.to_string(), user.password_hash.clone())
                    .await?
            }
            None => self.passwords.verify_dummy(password.to_string()).await?,
        };

        let user = match user {
            Some(user) if verified => user,
            _ => {
                debug!("Login rejected");
                return Err(AuthError::InvalidCredentials);
            }
        };

        let tokens = self.issue_tokens(&user).await?;
        info!("User {} logged in", user.subject_id);
        Ok(AuthResponse {
            tokens,
            user: user.into(),
        })
    }

    /// Rotate a refresh token into a new token pair
    ///
    /// The replacement is stored before the presented token is consumed, so a
    /// store failure leaves the presented token usable for a retry. A replay
    /// or a concurrent refresh with the same token loses the consume, gets
    /// `InvalidToken`, and its replacement is dropped again.
    ///
    /// The role is read again from the user store, and tokens minted before
    /// the subject's last password change are refused.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.refresh_tokens.verify(refresh_token)?;

        let user = self.find_user_by_id(claims.sub).await?.ok_or_else(|| {
            warn!("Refresh for deleted subject {}", claims.sub);
            AuthError::InvalidToken
        })?;
        if claims.ver != user.credential_version {
            warn!(
                "Refresh token for subject {} predates a password change",
                claims.sub
            );
            self.discard(refresh_token).await;
            return Err(AuthError::InvalidToken);
        }

        let tokens = self.issue_tokens(&user).await?;
        if let Err(e) = self.refresh_tokens.consume(refresh_token).await {
            self.discard(&tokens.refresh_token).await;
            return Err(e);
        }

        debug!("Rotated refresh token for subject {}", user.subject_id);
        Ok(tokens)
    }

    /// Revoke one refresh token. Unknown, invalid or already revoked tokens
    /// are not an error.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        if self.refresh_tokens.revoke(refresh_token).await? {
            debug!("Refresh token revoked on logout");
        }
        Ok(())
    }

    /// Revoke every refresh token of a subject
    pub async fn logout_all(&self, subject_id: Uuid) -> Result<u64, AuthError> {
        self.refresh_tokens.revoke_all(subject_id).await
    }

    /// Mint a short-lived password reset token for `username`.
    /// Delivering it to the user is the caller's job.
    pub async fn request_password_reset(&self, username: &str) -> Result<ResetTokenResponse, AuthError> {
        let user = self
            .find_user_by_name(username)
            .await?
            .ok_or_else(|| AuthError::NotFound("User".to_string()))?;

        let reset_token = self
            .tokens
            .generate_reset_token(user.identity(), user.credential_version)?;
        info!("Password reset requested for subject {}", user.subject_id);
        Ok(ResetTokenResponse {
            reset_token,
            expires_in: self.tokens.ttl(TokenPurpose::Reset).num_seconds(),
        })
    }

    /// Set a new password using a reset token and end all existing sessions
    ///
    /// A reset token works once: the password change bumps the credential
    /// version the token was minted under.
    pub async fn reset_password(&self, reset_token: &str, new_password: &str) -> Result<(), AuthError> {
        let claims = self.tokens.validate_reset_token(reset_token).map_err(|e| {
            debug!("Reset token rejected: {}", e);
            AuthError::InvalidToken
        })?;
        PasswordService::validate_password_strength(new_password)?;

        let password_hash = self.passwords.hash_async(new_password.to_string()).await?;
        let updated = bounded(
            self.store_timeout,
            "password update",
            self.users
                .update_password_hash(claims.sub, claims.ver, &password_hash),
        )
        .await?;
        if !updated {
            debug!("Reset token for subject {} is spent or stale", claims.sub);
            return Err(AuthError::InvalidToken);
        }

        // Older refresh tokens already fail the version check; this only
        // clears them out of the store
        match self.refresh_tokens.revoke_all(claims.sub).await {
            Ok(revoked) => info!(
                "Password reset for subject {}, {} sessions revoked",
                claims.sub, revoked
            ),
            Err(e) => warn!(
                "Password reset for subject {}, session cleanup failed: {}",
                claims.sub, e
            ),
        }
        Ok(())
    }

    /// Profile of the authenticated subject
    pub async fn current_user(&self, subject_id: Uuid) -> Result<UserResponse, AuthError> {
        self.find_user_by_id(subject_id)
            .await?
            .map(UserResponse::from)
            .ok_or_else(|| AuthError::NotFound("User".to_string()))
    }

    /// Create the account unless the username already exists.
    /// Returns the existing or new record.
    pub async fn ensure_user(
        &self,
        username: &str,
        password: &str,
        role: Role,
    ) -> Result<CredentialRecord, AuthError> {
        if let Some(existing) = self.find_user_by_name(username).await? {
            return Ok(existing);
        }
        PasswordService::validate_password_strength(password)?;
        let password_hash = self.passwords.hash_async(password.to_string()).await?;
        let user = bounded(
            self.store_timeout,
            "user create",
            self.users.create(username, &password_hash, role),
        )
        .await?;
        info!("Created {} account {}", role, user.subject_id);
        Ok(user)
    }

    /// Drop expired refresh tokens from the store
    pub async fn purge_expired_refresh_tokens(&self) -> Result<u64, AuthError> {
        let purged = self.refresh_tokens.purge_expired().await?;
        if purged > 0 {
            info!("Purged {} expired refresh tokens", purged);
        }
        Ok(purged)
    }
}
