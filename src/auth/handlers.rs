// HTTP handlers for authentication endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{
    error::AuthError,
    middleware::AuthenticatedUser,
    models::{
        AuthResponse, ForgotPasswordRequest, LoginRequest, RefreshRequest, RegisterRequest,
        ResetPasswordRequest, ResetTokenResponse, RevokedSessionsResponse, TokenPair, UserResponse,
    },
    service::SessionManager,
};

/// Register a new user
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered and logged in", body = AuthResponse),
        (status = 400, description = "Invalid username or weak password"),
        (status = 409, description = "Username already taken"),
        (status = 503, description = "Store temporarily unavailable")
    ),
    tag = "auth"
)]
pub async fn register_handler(
    State(sessions): State<Arc<SessionManager>>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AuthError> {
    request.validate()?;
    let response = sessions.register(&request.username, &request.password).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Login with username and password
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthResponse),
        (status = 401, description = "Invalid username or password"),
        (status = 503, description = "Store temporarily unavailable")
    ),
    tag = "auth"
)]
pub async fn login_handler(
    State(sessions): State<Arc<SessionManager>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    // Malformed input gets the same answer as a wrong password
    if request.validate().is_err() {
        return Err(AuthError::InvalidCredentials);
    }
    let response = sessions.login(&request.username, &request.password).await?;
    Ok(Json(response))
}

/// Exchange a refresh token for a new token pair
#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Tokens rotated", body = TokenPair),
        (status = 401, description = "Refresh token invalid, expired or already used")
    ),
    tag = "auth"
)]
pub async fn refresh_handler(
    State(sessions): State<Arc<SessionManager>>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, AuthError> {
    let tokens = sessions.refresh(&request.refresh_token).await?;
    Ok(Json(tokens))
}

/// Revoke a refresh token
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    request_body = RefreshRequest,
    responses(
        (status = 204, description = "Logged out (also when the token was unknown)")
    ),
    tag = "auth"
)]
pub async fn logout_handler(
    State(sessions): State<Arc<SessionManager>>,
    Json(request): Json<RefreshRequest>,
) -> Result<StatusCode, AuthError> {
    sessions.logout(&request.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Revoke every refresh token of the caller
#[utoipa::path(
    post,
    path = "/api/auth/logout-all",
    responses(
        (status = 200, description = "All sessions revoked", body = RevokedSessionsResponse),
        (status = 401, description = "Authentication required")
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn logout_all_handler(
    State(sessions): State<Arc<SessionManager>>,
    AuthenticatedUser(identity): AuthenticatedUser,
) -> Result<Json<RevokedSessionsResponse>, AuthError> {
    let revoked = sessions.logout_all(identity.subject_id).await?;
    Ok(Json(RevokedSessionsResponse { revoked }))
}

/// Request a password reset token
#[utoipa::path(
    post,
    path = "/api/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset token issued", body = ResetTokenResponse),
        (status = 404, description = "User not found")
    ),
    tag = "auth"
)]
pub async fn forgot_password_handler(
    State(sessions): State<Arc<SessionManager>>,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<Json<ResetTokenResponse>, AuthError> {
    request.validate()?;
    let response = sessions.request_password_reset(&request.username).await?;
    Ok(Json(response))
}

/// Set a new password with a reset token
#[utoipa::path(
    post,
    path = "/api/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 204, description = "Password changed, all sessions revoked"),
        (status = 400, description = "Weak password"),
        (status = 401, description = "Reset token invalid, expired or already used")
    ),
    tag = "auth"
)]
pub async fn reset_password_handler(
    State(sessions): State<Arc<SessionManager>>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<StatusCode, AuthError> {
    request.validate()?;
    sessions
        .reset_password(&request.token, &request.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Get current user information
#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Authentication required")
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn me_handler(
    State(sessions): State<Arc<SessionManager>>,
    AuthenticatedUser(identity): AuthenticatedUser,
) -> Result<Json<UserResponse>, AuthError> {
    let user = sessions.current_user(identity.subject_id).await?;
    Ok(Json(user))
}

/// Revoke every session of a user (admin only)
#[utoipa::path(
    post,
    path = "/api/admin/users/{id}/revoke-sessions",
    params(
        ("id" = Uuid, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "Sessions revoked", body = RevokedSessionsResponse),
        (status = 401, description = "Authentication required"),
        (status = 403, description = "Admin role required")
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn revoke_sessions_handler(
    State(sessions): State<Arc<SessionManager>>,
    Path(subject_id): Path<Uuid>,
) -> Result<Json<RevokedSessionsResponse>, AuthError> {
    let revoked = sessions.logout_all(subject_id).await?;
    Ok(Json(RevokedSessionsResponse { revoked }))
}
