// Authentication module
// Credential verification, token issuance with refresh rotation, and
// role-based access control for axum routes

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod password;
pub mod redis_store;
pub mod refresh_store;
pub mod repository;
pub mod service;
pub mod token;
pub mod user_store;

// Re-export commonly used types
pub use error::AuthError;
pub use middleware::{require_auth, require_role, AccessGuard, AuthenticatedUser, RequireRole};
pub use models::{Identity, Role};
pub use refresh_store::{InMemoryRefreshStore, RefreshStore, RefreshTokenRegistry};
pub use service::SessionManager;
pub use token::{TokenError, TokenPurpose, TokenService};
pub use user_store::{InMemoryUserStore, UserStore};
