// Access guard and axum middleware for protected routes

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

use crate::auth::{error::AuthError, models::Identity, models::Role, token::TokenService};

/// Resolves bearer credentials into an `Identity` and checks roles
#[derive(Clone)]
pub struct AccessGuard {
    tokens: Arc<TokenService>,
}

impl AccessGuard {
    pub fn new(tokens: Arc<TokenService>) -> Self {
        Self { tokens }
    }

    /// Verify an access token. Every failure is `InvalidToken`.
    pub fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        self.tokens
            .validate_access_token(token)
            .map(|claims| claims.identity())
            .map_err(|e| {
                debug!("Access token rejected: {}", e);
                AuthError::InvalidToken
            })
    }

    /// Authenticate from an `Authorization` header value.
    /// The scheme is matched case-insensitively.
    pub fn authenticate_header(&self, value: Option<&str>) -> Result<Identity, AuthError> {
        let value = value.ok_or(AuthError::MissingToken)?;

        let (scheme, token) = value.trim().split_once(' ').ok_or(AuthError::InvalidToken)?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(AuthError::InvalidToken);
        }
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::InvalidToken);
        }

        self.authenticate(token)
    }

    fn identify(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        let value = headers
            .get(header::AUTHORIZATION)
            .map(|value| value.to_str().map_err(|_| AuthError::InvalidToken))
            .transpose()?;
        self.authenticate_header(value)
    }

    /// Admit the identity only when its role is in `allowed`
    pub fn authorize(identity: &Identity, allowed: &[Role]) -> Result<(), AuthError> {
        if allowed.contains(&identity.role) {
            Ok(())
        } else {
            Err(AuthError::Forbidden {
                allowed: allowed.to_vec(),
                actual: identity.role,
            })
        }
    }
}

/// Middleware that rejects unauthenticated requests and attaches the
/// caller's `Identity` to the request extensions
pub async fn require_auth(
    State(guard): State<AccessGuard>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let identity = guard.identify(request.headers()).map_err(|e| {
        debug!("Unauthenticated request to {}", request.uri().path());
        e
    })?;
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// Authenticated caller, extracted in handlers.
///
/// Reuses the identity attached by `require_auth` / `require_role` when
/// present, otherwise authenticates the request itself.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    AccessGuard: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<Identity>() {
            return Ok(AuthenticatedUser(*identity));
        }

        let guard = AccessGuard::from_ref(state);
        let identity = guard.identify(&parts.headers)?;
        parts.extensions.insert(identity);
        Ok(AuthenticatedUser(identity))
    }
}

/// Role rule for `require_role`
#[derive(Clone)]
pub struct RequireRole {
    guard: AccessGuard,
    allowed: Arc<[Role]>,
}

impl RequireRole {
    /// Create a rule admitting any of the given roles
    pub fn new(guard: AccessGuard, allowed: &[Role]) -> Self {
        Self {
            guard,
            allowed: Arc::from(allowed),
        }
    }

    /// Create a rule that requires Admin role
    pub fn admin(guard: AccessGuard) -> Self {
        Self::new(guard, &[Role::Admin])
    }
}

/// Middleware enforcing a `RequireRole` rule.
///
/// Authenticates first when no identity is attached yet, so it is safe to
/// use without `require_auth` in front of it.
pub async fn require_role(
    State(rule): State<RequireRole>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let endpoint = request.uri().path().to_string();

    let identity = match request.extensions().get::<Identity>().copied() {
        Some(identity) => identity,
        None => {
            let identity = rule.guard.identify(request.headers())?;
            request.extensions_mut().insert(identity);
            identity
        }
    };

    // The warn! line comes from AuthError::into_response
    AccessGuard::authorize(&identity, &rule.allowed).map_err(|e| {
        debug!("Rejected subject {} at {}", identity.subject_id, endpoint);
        e
    })?;

    debug!(
        "Authorization successful: subject={}, role={}, endpoint={}",
        identity.subject_id, identity.role, endpoint
    );
    Ok(next.run(request).await)
}
