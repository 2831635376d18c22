// JWT token generation and validation service

use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::auth::error::AuthError;
use crate::auth::models::{Identity, Role, TokenPair};
use crate::config::AuthConfig;

/// What a token may be used for. Each purpose has its own signing secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenPurpose {
    Access,
    Refresh,
    Reset,
}

impl fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenPurpose::Access => write!(f, "access"),
            TokenPurpose::Refresh => write!(f, "refresh"),
            TokenPurpose::Reset => write!(f, "reset"),
        }
    }
}

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,       // subject_id
    pub role: Role,
    pub purpose: TokenPurpose,
    pub iss: String,
    pub iat: i64,        // issued at timestamp
    pub exp: i64,        // expiration timestamp
    pub jti: Uuid,       // unique per token, even within the same second
    /// Credential version of the subject when the token was minted.
    /// Refresh and reset tokens die once the password changes.
    #[serde(default)]
    pub ver: i64,
}

impl Claims {
    pub fn identity(&self) -> Identity {
        Identity::new(self.sub, self.role)
    }
}

/// Why a token failed verification.
/// Never shown to clients, everything maps to `AuthError::InvalidToken`.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,

    #[error("bad signature")]
    BadSignature,

    #[error("token expired")]
    Expired,

    #[error("token purpose mismatch: expected {expected}, found {found}")]
    WrongPurpose {
        expected: TokenPurpose,
        found: TokenPurpose,
    },

    #[error("token encoding failed: {0}")]
    Encoding(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::BadSignature,
            _ => TokenError::Malformed,
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Encoding(msg) => AuthError::TokenGenerationError(msg),
            _ => AuthError::InvalidToken,
        }
    }
}

#[derive(Clone)]
struct SigningKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SigningKey {
    fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }
}

/// Token service for JWT operations
///
/// Access tokens expire in 15 minutes, refresh tokens in 7 days and reset
/// tokens in 15 minutes unless configured otherwise.
#[derive(Clone)]
pub struct TokenService {
    access: SigningKey,
    refresh: SigningKey,
    reset: SigningKey,
    issuer: String,
}

impl TokenService {
    /// Create a new TokenService from the configured secrets and lifetimes
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            access: SigningKey::new(&config.access_secret, config.access_ttl),
            refresh: SigningKey::new(&config.refresh_secret, config.refresh_ttl),
            reset: SigningKey::new(&config.reset_secret, config.reset_ttl),
            issuer: config.issuer.clone(),
        }
    }

    fn key(&self, purpose: TokenPurpose) -> &SigningKey {
        match purpose {
            TokenPurpose::Access => &self.access,
            TokenPurpose::Refresh => &self.refresh,
            TokenPurpose::Reset => &self.reset,
        }
    }

    /// Configured lifetime for a purpose
    pub fn ttl(&self, purpose: TokenPurpose) -> Duration {
        self.key(purpose).ttl
    }

    /// Sign a token for `identity` with the configured lifetime of `purpose`
    pub fn sign(&self, identity: Identity, purpose: TokenPurpose) -> Result<String, TokenError> {
        self.sign_with_ttl(identity, purpose, self.ttl(purpose))
    }

    /// Sign a token with an explicit lifetime, at credential version 0
    pub fn sign_with_ttl(
        &self,
        identity: Identity,
        purpose: TokenPurpose,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        self.sign_versioned(identity, 0, purpose, ttl)
    }

    pub fn sign_versioned(
        &self,
        identity: Identity,
        credential_version: i64,
        purpose: TokenPurpose,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: identity.subject_id,
            role: identity.role,
            purpose,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4(),
            ver: credential_version,
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.key(purpose).encoding,
        )
        .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    /// Verify signature, issuer, expiry and purpose of a token
    pub fn verify(&self, token: &str, purpose: TokenPurpose) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // One second past `exp` must already fail
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let claims = decode::<Claims>(token, &self.key(purpose).decoding, &validation)?.claims;

        if claims.purpose != purpose {
            return Err(TokenError::WrongPurpose {
                expected: purpose,
                found: claims.purpose,
            });
        }

        Ok(claims)
    }

    /// Generate an access token
    pub fn generate_access_token(&self, identity: Identity) -> Result<String, TokenError> {
        self.sign(identity, TokenPurpose::Access)
    }

    /// Generate a refresh token bound to the subject's credential version
    pub fn generate_refresh_token(
        &self,
        identity: Identity,
        credential_version: i64,
    ) -> Result<String, TokenError> {
        self.sign_versioned(identity, credential_version, TokenPurpose::Refresh, self.refresh.ttl)
    }

    /// Generate a password reset token bound to the subject's credential version
    pub fn generate_reset_token(
        &self,
        identity: Identity,
        credential_version: i64,
    ) -> Result<String, TokenError> {
        self.sign_versioned(identity, credential_version, TokenPurpose::Reset, self.reset.ttl)
    }

    /// Validate an access token
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, TokenPurpose::Access)
    }

    /// Validate a refresh token
    pub fn validate_refresh_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, TokenPurpose::Refresh)
    }

    /// Validate a password reset token
    pub fn validate_reset_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, TokenPurpose::Reset)
    }

    /// Generate both access and refresh tokens
    pub fn generate_token_pair(
        &self,
        identity: Identity,
        credential_version: i64,
    ) -> Result<TokenPair, TokenError> {
        let access_token = self.generate_access_token(identity)?;
        let refresh_token = self.generate_refresh_token(identity, credential_version)?;
        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access.ttl.num_seconds(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;

    pub(crate) fn test_auth_config() -> AuthConfig {
        AuthConfig::new(
            "test_access_secret_key_for_testing_purposes",
            "test_refresh_secret_key_for_testing_purposes",
            "test_reset_secret_key_for_testing_purposes",
        )
    }

    // Helper to create a test token service
    pub(crate) fn test_token_service() -> TokenService {
        TokenService::new(&test_auth_config())
    }

    fn alice() -> Identity {
        Identity::new(Uuid::new_v4(), Role::User)
    }

    // Replace one character so the result is still URL-safe base64
    fn tamper_at(token: &str, index: usize) -> String {
        let mut bytes = token.as_bytes().to_vec();
        bytes[index] = if bytes[index] == b'A' { b'B' } else { b'A' };
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_access_token_expiration_is_15_minutes() {
        let service = test_token_service();
        let token = service.generate_access_token(alice()).unwrap();
        let claims = service.validate_access_token(&token).unwrap();

        assert_eq!(claims.exp - claims.iat, 900);
        assert_eq!(claims.purpose, TokenPurpose::Access);
    }

    #[test]
    fn test_refresh_token_expiration_is_7_days() {
        let service = test_token_service();
        let token = service.generate_refresh_token(alice(), 0).unwrap();
        let claims = service.validate_refresh_token(&token).unwrap();

        assert_eq!(claims.exp - claims.iat, 604800);
        assert_eq!(claims.purpose, TokenPurpose::Refresh);
    }

    #[test]
    fn test_token_claims_contain_identity() {
        let service = test_token_service();
        let identity = Identity::new(Uuid::new_v4(), Role::Admin);

        let access_token = service.generate_access_token(identity).unwrap();
        let claims = service.validate_access_token(&access_token).unwrap();
        assert_eq!(claims.identity(), identity);
        assert_eq!(claims.iss, "session-auth");
    }

    #[test]
    fn test_generate_token_pair() {
        let service = test_token_service();
        let pair = service.generate_token_pair(alice(), 0).unwrap();

        assert!(service.validate_access_token(&pair.access_token).is_ok());
        assert!(service.validate_refresh_token(&pair.refresh_token).is_ok());
        assert_ne!(pair.access_token, pair.refresh_token);
        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 900);
    }

    #[test]
    fn test_tokens_minted_in_same_second_differ() {
        let service = test_token_service();
        let identity = alice();
        let first = service.generate_refresh_token(identity, 0).unwrap();
        let second = service.generate_refresh_token(identity, 0).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_credential_version_is_carried() {
        let service = test_token_service();
        let identity = alice();

        let refresh = service.generate_refresh_token(identity, 3).unwrap();
        assert_eq!(service.validate_refresh_token(&refresh).unwrap().ver, 3);

        let reset = service.generate_reset_token(identity, 7).unwrap();
        assert_eq!(service.validate_reset_token(&reset).unwrap().ver, 7);

        let pair = service.generate_token_pair(identity, 2).unwrap();
        assert_eq!(service.validate_refresh_token(&pair.refresh_token).unwrap().ver, 2);
    }

    #[test]
    fn test_purposes_do_not_cross_verify() {
        let service = test_token_service();
        let identity = alice();

        let access = service.generate_access_token(identity).unwrap();
        let refresh = service.generate_refresh_token(identity, 0).unwrap();
        let reset = service.generate_reset_token(identity, 0).unwrap();

        assert!(matches!(service.validate_refresh_token(&access), Err(TokenError::BadSignature)));
        assert!(matches!(service.validate_reset_token(&access), Err(TokenError::BadSignature)));
        assert!(matches!(service.validate_access_token(&refresh), Err(TokenError::BadSignature)));
        assert!(matches!(service.validate_access_token(&reset), Err(TokenError::BadSignature)));
        assert!(matches!(service.validate_refresh_token(&reset), Err(TokenError::BadSignature)));
    }

    #[test]
    fn test_purpose_claim_checked_even_with_matching_key() {
        // Signed with the access secret but claiming to be a reset token
        let service = test_token_service();
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4(),
            role: Role::User,
            purpose: TokenPurpose::Reset,
            iss: "session-auth".to_string(),
            iat: now,
            exp: now + 600,
            jti: Uuid::new_v4(),
            ver: 0,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret("test_access_secret_key_for_testing_purposes".as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            service.validate_access_token(&token),
            Err(TokenError::WrongPurpose { expected: TokenPurpose::Access, found: TokenPurpose::Reset })
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let service = test_token_service();
        let token = service
            .sign_with_ttl(alice(), TokenPurpose::Access, Duration::seconds(-1))
            .unwrap();
        assert!(matches!(service.validate_access_token(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn test_expired_token_rejected_without_leeway() {
        // jsonwebtoken's default leeway would accept this one
        let service = test_token_service();
        let token = service
            .sign_with_ttl(alice(), TokenPurpose::Access, Duration::seconds(-2))
            .unwrap();
        assert!(matches!(service.validate_access_token(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let service = test_token_service();
        let other = TokenService {
            issuer: "someone-else".to_string(),
            ..test_token_service()
        };
        let token = other.generate_access_token(alice()).unwrap();
        assert!(matches!(service.validate_access_token(&token), Err(TokenError::Malformed)));
    }

    #[test]
    fn test_malformed_tokens_are_rejected() {
        let service = test_token_service();

        assert!(service.validate_access_token("").is_err());
        assert!(service.validate_access_token("not.a.token").is_err());
        assert!(service.validate_access_token("invalid_token_format").is_err());
        assert!(service
            .validate_access_token("eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.invalid.signature")
            .is_err());
    }

    #[test]
    fn test_token_signature_verification() {
        let service1 = test_token_service();
        let mut other_config = test_auth_config();
        other_config.access_secret = "a_completely_different_access_secret_value".to_string();
        let service2 = TokenService::new(&other_config);

        let token = service1.generate_access_token(alice()).unwrap();
        assert!(service1.validate_access_token(&token).is_ok());
        assert!(matches!(service2.validate_access_token(&token), Err(TokenError::BadSignature)));
    }

    #[test]
    fn test_verification_errors_collapse_to_invalid_token() {
        for err in [
            TokenError::Malformed,
            TokenError::BadSignature,
            TokenError::Expired,
            TokenError::WrongPurpose {
                expected: TokenPurpose::Access,
                found: TokenPurpose::Reset,
            },
        ] {
            assert!(matches!(AuthError::from(err), AuthError::InvalidToken));
        }
        assert!(matches!(
            AuthError::from(TokenError::Encoding("boom".to_string())),
            AuthError::TokenGenerationError(_)
        ));
    }

    // Property-based tests using proptest

    proptest! {
        #[test]
        fn prop_token_claims_contain_identity(admin in any::<bool>(), raw_id in any::<u128>()) {
            let service = test_token_service();
            let role = if admin { Role::Admin } else { Role::User };
            let identity = Identity::new(Uuid::from_u128(raw_id), role);

            let access = service.generate_access_token(identity)?;
            prop_assert_eq!(service.validate_access_token(&access)?.identity(), identity);

            let refresh = service.generate_refresh_token(identity, 0)?;
            prop_assert_eq!(service.validate_refresh_token(&refresh)?.identity(), identity);
        }

        #[test]
        fn prop_tampered_tokens_rejected(position in any::<proptest::sample::Index>()) {
            let service = test_token_service();
            let token = service.generate_access_token(alice())?;

            // Any character but the separators and the final one, whose low
            // bits are padding in base64
            let candidates: Vec<usize> = token
                .char_indices()
                .filter(|(i, c)| *c != '.' && *i != token.len() - 1)
                .map(|(i, _)| i)
                .collect();
            let index = candidates[position.index(candidates.len())];

            let tampered = tamper_at(&token, index);
            prop_assert!(service.validate_access_token(&tampered).is_err());
        }

        #[test]
        fn prop_malformed_tokens_rejected(malformed in "[a-zA-Z0-9]{10,50}") {
            let service = test_token_service();
            prop_assert!(service.validate_access_token(&malformed).is_err());
        }
    }
}
