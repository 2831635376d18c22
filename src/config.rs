// Service configuration loaded from environment variables
// Secrets are never hard-coded; `.env` is honoured through dotenv in main.

use chrono::Duration;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration as StdDuration;
use thiserror::Error;

/// Minimum length of each signing secret, in bytes
pub const MIN_SECRET_LEN: usize = 32;

const DEFAULT_ACCESS_TTL_SECS: i64 = 900; // 15 minutes
const DEFAULT_REFRESH_TTL_SECS: i64 = 604_800; // 7 days
const DEFAULT_RESET_TTL_SECS: i64 = 900; // 15 minutes
const DEFAULT_STORE_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_HASH_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_ISSUER: &str = "session-auth";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set in environment")]
    Missing(&'static str),

    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },

    #[error("{0} must be at least 32 bytes long")]
    WeakSecret(&'static str),

    #[error("access, refresh and reset secrets must all be different")]
    SharedSecret,
}

/// Argon2 cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashParams {
    /// OWASP baseline for Argon2id: 19 MiB, 2 passes, 1 lane
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Token, hashing and timeout settings of the authentication core
#[derive(Clone)]
pub struct AuthConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub reset_secret: String,
    pub issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub reset_ttl: Duration,
    pub store_timeout: StdDuration,
    pub hash_timeout: StdDuration,
    pub hash_params: HashParams,
}

impl AuthConfig {
    /// Create a configuration with default lifetimes and the given secrets
    pub fn new(
        access_secret: impl Into<String>,
        refresh_secret: impl Into<String>,
        reset_secret: impl Into<String>,
    ) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            reset_secret: reset_secret.into(),
            issuer: DEFAULT_ISSUER.to_string(),
            access_ttl: Duration::seconds(DEFAULT_ACCESS_TTL_SECS),
            refresh_ttl: Duration::seconds(DEFAULT_REFRESH_TTL_SECS),
            reset_ttl: Duration::seconds(DEFAULT_RESET_TTL_SECS),
            store_timeout: StdDuration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            hash_timeout: StdDuration::from_millis(DEFAULT_HASH_TIMEOUT_MS),
            hash_params: HashParams::default(),
        }
    }

    /// Load from ACCESS_TOKEN_SECRET, REFRESH_TOKEN_SECRET, RESET_TOKEN_SECRET
    /// and the optional lifetime/timeout/cost variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = HashParams::default();
        let config = Self {
            access_secret: required("ACCESS_TOKEN_SECRET")?,
            refresh_secret: required("REFRESH_TOKEN_SECRET")?,
            reset_secret: required("RESET_TOKEN_SECRET")?,
            issuer: env::var("TOKEN_ISSUER").unwrap_or_else(|_| DEFAULT_ISSUER.to_string()),
            access_ttl: Duration::seconds(parsed("ACCESS_TOKEN_TTL_SECS", DEFAULT_ACCESS_TTL_SECS)?),
            refresh_ttl: Duration::seconds(parsed("REFRESH_TOKEN_TTL_SECS", DEFAULT_REFRESH_TTL_SECS)?),
            reset_ttl: Duration::seconds(parsed("RESET_TOKEN_TTL_SECS", DEFAULT_RESET_TTL_SECS)?),
            store_timeout: StdDuration::from_millis(parsed("STORE_TIMEOUT_MS", DEFAULT_STORE_TIMEOUT_MS)?),
            hash_timeout: StdDuration::from_millis(parsed("HASH_TIMEOUT_MS", DEFAULT_HASH_TIMEOUT_MS)?),
            hash_params: HashParams {
                memory_kib: parsed("ARGON2_MEMORY_KIB", defaults.memory_kib)?,
                iterations: parsed("ARGON2_ITERATIONS", defaults.iterations)?,
                parallelism: parsed("ARGON2_PARALLELISM", defaults.parallelism)?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject short or shared secrets and non-positive lifetimes
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, secret) in [
            ("ACCESS_TOKEN_SECRET", &self.access_secret),
            ("REFRESH_TOKEN_SECRET", &self.refresh_secret),
            ("RESET_TOKEN_SECRET", &self.reset_secret),
        ] {
            if secret.len() < MIN_SECRET_LEN {
                return Err(ConfigError::WeakSecret(key));
            }
        }

        if self.access_secret == self.refresh_secret
            || self.access_secret == self.reset_secret
            || self.refresh_secret == self.reset_secret
        {
            return Err(ConfigError::SharedSecret);
        }

        for (key, ttl) in [
            ("ACCESS_TOKEN_TTL_SECS", self.access_ttl),
            ("REFRESH_TOKEN_TTL_SECS", self.refresh_ttl),
            ("RESET_TOKEN_TTL_SECS", self.reset_ttl),
        ] {
            if ttl <= Duration::zero() {
                return Err(ConfigError::Invalid {
                    key,
                    value: ttl.num_seconds().to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    pub fn refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    pub fn reset_ttl(mut self, ttl: Duration) -> Self {
        self.reset_ttl = ttl;
        self
    }

    pub fn store_timeout(mut self, timeout: StdDuration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn hash_params(mut self, params: HashParams) -> Self {
        self.hash_params = params;
        self
    }
}

// Secrets are redacted so the config can be logged
impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("access_secret", &"<redacted>")
            .field("refresh_secret", &"<redacted>")
            .field("reset_secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("reset_ttl", &self.reset_ttl)
            .field("store_timeout", &self.store_timeout)
            .field("hash_timeout", &self.hash_timeout)
            .field("hash_params", &self.hash_params)
            .finish()
    }
}

/// Which backend keeps track of issued refresh tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStoreKind {
    Memory,
    Postgres,
    Redis,
}

impl FromStr for RefreshStoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(RefreshStoreKind::Memory),
            "postgres" | "postgresql" => Ok(RefreshStoreKind::Postgres),
            "redis" => Ok(RefreshStoreKind::Redis),
            other => Err(other.to_string()),
        }
    }
}

/// Per-IP rate limit applied to the credential endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Seconds until one more request is allowed
    pub replenish_secs: u64,
    pub burst_size: u32,
}

impl RateLimitConfig {
    /// Enabled only when `RATE_LIMIT_REPLENISH_SECS` is set
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        if env::var("RATE_LIMIT_REPLENISH_SECS").is_err() {
            return Ok(None);
        }
        Ok(Some(Self {
            replenish_secs: parsed("RATE_LIMIT_REPLENISH_SECS", 1)?,
            burst_size: parsed("RATE_LIMIT_BURST", 5)?,
        }))
    }
}

/// Optional administrator account created at startup
#[derive(Clone)]
pub struct AdminSeed {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for AdminSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminSeed")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Full process configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub auth: AuthConfig,
    pub refresh_store: RefreshStoreKind,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub purge_interval: StdDuration,
    pub rate_limit: Option<RateLimitConfig>,
    pub admin_seed: Option<AdminSeed>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let refresh_store = match env::var("REFRESH_STORE") {
            Ok(value) => value.parse().map_err(|value| ConfigError::Invalid {
                key: "REFRESH_STORE",
                value,
            })?,
            Err(_) => RefreshStoreKind::Memory,
        };

        let database_url = env::var("DATABASE_URL").ok();
        let redis_url = env::var("REDIS_URL").ok();

        match refresh_store {
            RefreshStoreKind::Postgres if database_url.is_none() => {
                return Err(ConfigError::Missing("DATABASE_URL"))
            }
            RefreshStoreKind::Redis if redis_url.is_none() => {
                return Err(ConfigError::Missing("REDIS_URL"))
            }
            _ => {}
        }

        let admin_seed = match (env::var("ADMIN_USERNAME"), env::var("ADMIN_PASSWORD")) {
            (Ok(username), Ok(password)) => Some(AdminSeed { username, password }),
            _ => None,
        };

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parsed("PORT", 8080)?,
            auth: AuthConfig::from_env()?,
            refresh_store,
            database_url,
            redis_url,
            purge_interval: StdDuration::from_secs(parsed("REFRESH_PURGE_INTERVAL_SECS", 3_600)?),
            rate_limit: RateLimitConfig::from_env()?,
            admin_seed,
        })
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn parsed<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets() -> AuthConfig {
        AuthConfig::new(
            "access_secret_for_tests_0123456789abcdef",
            "refresh_secret_for_tests_0123456789abcdef",
            "reset_secret_for_tests_0123456789abcdef",
        )
    }

    #[test]
    fn test_default_lifetimes() {
        let config = secrets();
        assert_eq!(config.access_ttl.num_seconds(), 900);
        assert_eq!(config.refresh_ttl.num_seconds(), 604_800);
        assert_eq!(config.reset_ttl.num_seconds(), 900);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_short_secret_rejected() {
        let config = AuthConfig::new(
            "short",
            "refresh_secret_for_tests_0123456789abcdef",
            "reset_secret_for_tests_0123456789abcdef",
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WeakSecret("ACCESS_TOKEN_SECRET"))
        ));
    }

    #[test]
    fn test_shared_secret_rejected() {
        let secret = "one_secret_used_everywhere_0123456789abcdef";
        let config = AuthConfig::new(secret, secret, "reset_secret_for_tests_0123456789abcdef");
        assert!(matches!(config.validate(), Err(ConfigError::SharedSecret)));
    }

    #[test]
    fn test_non_positive_ttl_rejected() {
        let config = secrets().access_ttl(Duration::zero());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "ACCESS_TOKEN_TTL_SECS", .. })
        ));
    }

    #[test]
    fn test_debug_output_redacts_secrets() {
        let rendered = format!("{:?}", secrets());
        assert!(!rendered.contains("access_secret_for_tests"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_refresh_store_kind_parsing() {
        assert_eq!("memory".parse::<RefreshStoreKind>(), Ok(RefreshStoreKind::Memory));
        assert_eq!("PostgreSQL".parse::<RefreshStoreKind>(), Ok(RefreshStoreKind::Postgres));
        assert_eq!("redis".parse::<RefreshStoreKind>(), Ok(RefreshStoreKind::Redis));
        assert!("mongo".parse::<RefreshStoreKind>().is_err());
    }

    // Only test in this crate touching the RATE_LIMIT_* variables
    #[test]
    fn test_rate_limit_from_env() {
        env::remove_var("RATE_LIMIT_REPLENISH_SECS");
        env::remove_var("RATE_LIMIT_BURST");
        assert_eq!(RateLimitConfig::from_env().unwrap(), None);

        env::set_var("RATE_LIMIT_REPLENISH_SECS", "4");
        assert_eq!(
            RateLimitConfig::from_env().unwrap(),
            Some(RateLimitConfig {
                replenish_secs: 4,
                burst_size: 5,
            })
        );

        env::set_var("RATE_LIMIT_REPLENISH_SECS", "fast");
        assert!(matches!(
            RateLimitConfig::from_env(),
            Err(ConfigError::Invalid { key: "RATE_LIMIT_REPLENISH_SECS", .. })
        ));
        env::remove_var("RATE_LIMIT_REPLENISH_SECS");
    }
}
