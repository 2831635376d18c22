// Authentication and authorization error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::auth::models::Role;

/// Authentication and authorization error types
///
/// Token failures are deliberately coarse: expired, malformed, revoked and
/// wrong-purpose tokens all surface as `InvalidToken`.
#[derive(Debug, Error)]
pub enum AuthError {
    // Authentication errors
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Missing authentication token")]
    MissingToken,

    #[error("Username already taken")]
    UsernameTaken,

    #[error("Password does not meet requirements: {0}")]
    WeakPassword(String),

    #[error("{0} not found")]
    NotFound(String),

    // Authorization errors
    /// User lacks required permissions for the operation
    #[error("Insufficient permissions: role '{actual}' is not allowed")]
    Forbidden { allowed: Vec<Role>, actual: Role },

    // Infrastructure errors
    /// Store or hashing backend did not answer in time, or is unreachable.
    /// Callers may retry.
    #[error("Temporary store failure: {0}")]
    TransientStoreFailure(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Stored hash could not be parsed, the credential storage is corrupted
    #[error("Password hashing error")]
    PasswordHashError,

    #[error("Token generation error: {0}")]
    TokenGenerationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match &self {
            AuthError::InvalidCredentials => warn!("Failed login attempt"),
            AuthError::InvalidToken => warn!("Invalid token attempt"),
            AuthError::MissingToken => debug!("Missing token in request"),
            AuthError::Forbidden { allowed, actual } => {
                warn!("Authorization failed: allowed roles {:?}, user has role '{}'", allowed, actual)
            }
            AuthError::TransientStoreFailure(msg) => warn!("Transient auth failure: {}", msg),
            AuthError::DatabaseError(msg) => error!("Database error in auth: {}", msg),
            AuthError::PasswordHashError => error!("Stored password hash is malformed"),
            AuthError::TokenGenerationError(msg) => error!("Token generation error: {}", msg),
            AuthError::ConfigError(msg) => error!("Authorization configuration error: {}", msg),
            _ => {}
        }

        let body = Json(json!({
            "error": self.error_message(),
        }));

        (self.status_code(), body).into_response()
    }
}

impl AuthError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::MissingToken => StatusCode::UNAUTHORIZED,
            AuthError::UsernameTaken => StatusCode::CONFLICT,
            AuthError::WeakPassword(_) => StatusCode::BAD_REQUEST,
            AuthError::NotFound(_) => StatusCode::NOT_FOUND,
            AuthError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AuthError::TransientStoreFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::PasswordHashError => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::TokenGenerationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a descriptive error message for this error
    /// This message is safe to send to clients (no sensitive data)
    pub fn error_message(&self) -> String {
        match self {
            AuthError::ValidationError(msg) => msg.clone(),
            AuthError::InvalidCredentials => "Invalid username or password".to_string(),
            // Missing and invalid tokens share one message
            AuthError::InvalidToken | AuthError::MissingToken => "Authentication required".to_string(),
            AuthError::UsernameTaken => "Username already taken".to_string(),
            AuthError::WeakPassword(msg) => msg.clone(),
            AuthError::NotFound(what) => format!("{} not found", what),
            AuthError::Forbidden { .. } => "Not authorized to access this resource".to_string(),
            AuthError::TransientStoreFailure(_) => {
                "Service temporarily unavailable, please retry".to_string()
            }
            AuthError::DatabaseError(_)
            | AuthError::PasswordHashError
            | AuthError::TokenGenerationError(_)
            | AuthError::ConfigError(_) => "Internal server error".to_string(),
        }
    }

    /// Whether the caller may retry the same request later
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::TransientStoreFailure(_))
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AuthError::ValidationError(errors.to_string())
    }
}

/// Run a store or hashing call with an upper bound on its duration.
pub(crate) async fn bounded<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, AuthError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("{} timed out after {:?}", operation, limit);
            Err(AuthError::TransientStoreFailure(format!("{} timed out", operation)))
        }
    }
}
