// Session authentication service
// Token-based login, refresh rotation and role-based access control over axum

pub mod auth;
pub mod config;
pub mod db;
pub mod validation;

use axum::{
    extract::FromRef,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use auth::handlers::*;
use auth::models::{
    AuthResponse, ForgotPasswordRequest, LoginRequest, RefreshRequest, RegisterRequest,
    ResetPasswordRequest, ResetTokenResponse, RevokedSessionsResponse, Role, TokenPair,
    UserResponse,
};
use auth::{require_auth, require_role, AccessGuard, AuthError, RequireRole, SessionManager};
use config::RateLimitConfig;

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    paths(
        register_handler,
        login_handler,
        refresh_handler,
        logout_handler,
        logout_all_handler,
        forgot_password_handler,
        reset_password_handler,
        me_handler,
        revoke_sessions_handler,
    ),
    components(
        schemas(
            AuthResponse,
            TokenPair,
            UserResponse,
            Role,
            RegisterRequest,
            LoginRequest,
            RefreshRequest,
            ForgotPasswordRequest,
            ResetPasswordRequest,
            ResetTokenResponse,
            RevokedSessionsResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Login, token refresh and password reset"),
        (name = "admin", description = "Session administration")
    ),
    info(
        title = "Session Auth API",
        version = "1.0.0",
        description = "Token-based authentication with refresh token rotation"
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub guard: AccessGuard,
}

impl AppState {
    pub fn new(sessions: SessionManager) -> Self {
        let guard = AccessGuard::new(sessions.token_service());
        Self {
            sessions: Arc::new(sessions),
            guard,
        }
    }
}

impl FromRef<AppState> for Arc<SessionManager> {
    fn from_ref(state: &AppState) -> Self {
        state.sessions.clone()
    }
}

impl FromRef<AppState> for AccessGuard {
    fn from_ref(state: &AppState) -> Self {
        state.guard.clone()
    }
}

/// Creates and configures the application router
///
/// Credential endpoints get a per-IP rate limit when `rate_limit` is set. The
/// limiter keys on the peer address, so the server must be started with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn create_router(state: AppState, rate_limit: Option<RateLimitConfig>) -> Result<Router, AuthError> {
    // Configure CORS to allow all origins, methods, and headers
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let credentials = Router::new()
        .route("/api/auth/register", post(register_handler))
        .route("/api/auth/login", post(login_handler))
        .route("/api/auth/refresh", post(refresh_handler))
        .route("/api/auth/forgot-password", post(forgot_password_handler))
        .route("/api/auth/reset-password", post(reset_password_handler));

    let credentials = match rate_limit {
        Some(limit) => {
            let config = GovernorConfigBuilder::default()
                .per_second(limit.replenish_secs)
                .burst_size(limit.burst_size)
                .finish()
                .ok_or_else(|| AuthError::ConfigError("invalid rate limit settings".to_string()))?;
            tracing::info!(
                "Rate limiting credential endpoints: 1 request per {}s, burst {}",
                limit.replenish_secs,
                limit.burst_size
            );
            credentials.layer(GovernorLayer {
                config: Box::leak(Box::new(config)),
            })
        }
        None => credentials,
    };

    let authenticated = Router::new()
        .route("/api/auth/me", get(me_handler))
        .route("/api/auth/logout-all", post(logout_all_handler))
        .route_layer(from_fn_with_state(state.guard.clone(), require_auth));

    let admin = Router::new()
        .route(
            "/api/admin/users/:id/revoke-sessions",
            post(revoke_sessions_handler),
        )
        .route_layer(from_fn_with_state(
            RequireRole::admin(state.guard.clone()),
            require_role,
        ));

    Ok(Router::new()
        // Swagger UI
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // API routes
        .merge(credentials)
        .route("/api/auth/logout", post(logout_handler))
        .merge(authenticated)
        .merge(admin)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state))
}
