// Redis-backed refresh token store
//
// Layout:
//   refresh:token:{fingerprint}  -> subject id, expires with the token (PX)
//   refresh:subject:{subject_id} -> set of fingerprints, for logout-everywhere

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{RedisError, Script};
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::error::AuthError;
use crate::auth::models::RefreshEntry;
use crate::auth::refresh_store::RefreshStore;

const TOKEN_PREFIX: &str = "refresh:token:";
const SUBJECT_PREFIX: &str = "refresh:subject:";

// KEYS[1] token key; ARGV[1] subject prefix, ARGV[2] fingerprint.
// Taking the token and unindexing it happen in one step.
const TAKE_TOKEN: &str = r#"
local subject = redis.call('GETDEL', KEYS[1])
if not subject then
    return 0
end
redis.call('SREM', ARGV[1] .. subject, ARGV[2])
return 1
"#;

// KEYS[1] subject index; ARGV[1] token prefix.
// Atomic against concurrent inserts for the same subject.
const TAKE_SUBJECT: &str = r#"
local removed = 0
for _, fingerprint in ipairs(redis.call('SMEMBERS', KEYS[1])) do
    removed = removed + redis.call('DEL', ARGV[1] .. fingerprint)
end
redis.call('DEL', KEYS[1])
return removed
"#;

fn token_key(fingerprint: &str) -> String {
    format!("{}{}", TOKEN_PREFIX, fingerprint)
}

fn subject_key(subject_id: Uuid) -> String {
    format!("{}{}", SUBJECT_PREFIX, subject_id)
}

fn map_redis_error(e: RedisError) -> AuthError {
    if e.is_timeout() || e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        AuthError::TransientStoreFailure(format!("redis unavailable: {}", e))
    } else {
        AuthError::DatabaseError(format!("redis: {}", e))
    }
}

#[derive(Clone)]
pub struct RedisRefreshStore {
    conn: ConnectionManager,
    take_token: Script,
    take_subject: Script,
}

impl RedisRefreshStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            take_token: Script::new(TAKE_TOKEN),
            take_subject: Script::new(TAKE_SUBJECT),
        }
    }

    /// Open a managed connection; it reconnects on its own after failures
    pub async fn connect(url: &str) -> Result<Self, AuthError> {
        info!("Connecting to Redis...");
        let client = redis::Client::open(url)
            .map_err(|e| AuthError::ConfigError(format!("invalid REDIS_URL: {}", e)))?;
        let conn = ConnectionManager::new(client).await.map_err(map_redis_error)?;
        info!("Redis connection established");
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl RefreshStore for RedisRefreshStore {
    async fn insert(&self, entry: RefreshEntry) -> Result<(), AuthError> {
        let ttl_ms = (entry.expires_at - Utc::now()).num_milliseconds();
        if ttl_ms <= 0 {
            debug!("Skipping already expired refresh entry for {}", entry.subject_id);
            return Ok(());
        }

        let subject = subject_key(entry.subject_id);
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(token_key(&entry.fingerprint))
            .arg(entry.subject_id.to_string())
            .arg("PX")
            .arg(ttl_ms)
            .ignore()
            .cmd("SADD")
            .arg(&subject)
            .arg(&entry.fingerprint)
            .ignore()
            // Newest token lives longest, so the index outlives every member
            .cmd("PEXPIRE")
            .arg(&subject)
            .arg(ttl_ms)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(map_redis_error)
    }

    async fn contains(&self, fingerprint: &str) -> Result<bool, AuthError> {
        let mut conn = self.conn.clone();
        redis::cmd("EXISTS")
            .arg(token_key(fingerprint))
            .query_async::<_, bool>(&mut conn)
            .await
            .map_err(map_redis_error)
    }

    async fn remove(&self, fingerprint: &str) -> Result<bool, AuthError> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .take_token
            .key(token_key(fingerprint))
            .arg(SUBJECT_PREFIX)
            .arg(fingerprint)
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(removed == 1)
    }

    async fn remove_for_subject(&self, subject_id: Uuid) -> Result<u64, AuthError> {
        let mut conn = self.conn.clone();
        self.take_subject
            .key(subject_key(subject_id))
            .arg(TOKEN_PREFIX)
            .invoke_async::<_, u64>(&mut conn)
            .await
            .map_err(map_redis_error)
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64, AuthError> {
        // Token keys carry their own PX expiry
        Ok(0)
    }
}
