//! Refresh-token store: one active refresh token per user.
//!
//! Three variants share the [`RefreshTokenStore`] trait:
//! - [`RedisRefreshStore`]: production store; rotation is a single Lua
//!   compare-and-set so two concurrent rotations of the same token cannot
//!   both succeed.
//! - [`DisabledRefreshStore`]: for deployments without a cache. Writes are
//!   no-ops and every token is considered valid, which removes revocation
//!   and replay protection. Pick it explicitly; it logs a warning when built.
//! - [`MemoryRefreshStore`]: in-process store for tests and single-node demos.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::Script;
use redis::aio::ConnectionManager;
use tracing::{info, warn};

use super::AuthError;
use super::jwt::REFRESH_TOKEN_EXPIRY_SECS;

/// Stored refresh tokens live as long as the token itself.
pub const REFRESH_TOKEN_TTL: Duration = Duration::from_secs(REFRESH_TOKEN_EXPIRY_SECS as u64);

/// Cache key for a user's refresh token.
pub fn refresh_key(user_id: i64) -> String {
    format!("refresh:{user_id}")
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Set the user's refresh token, replacing any previous one.
    async fn store(&self, user_id: i64, token: &str) -> Result<(), AuthError>;

    /// True iff the stored token exists and equals `token`.
    async fn is_valid(&self, user_id: i64, token: &str) -> Result<bool, AuthError>;

    /// Atomically replace `old_token` with `new_token`; `StaleToken` if the
    /// stored value is no longer `old_token`.
    async fn rotate(&self, user_id: i64, old_token: &str, new_token: &str)
    -> Result<(), AuthError>;

    /// Delete the user's refresh token. Absent keys are not an error.
    async fn revoke(&self, user_id: i64) -> Result<(), AuthError>;

    /// Whether this store actually enforces validity and revocation.
    fn is_enforcing(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str;
}

// =============================================================================
// Redis
// =============================================================================

const ROTATE_LUA: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
    return 1
end
return 0
"#;

fn redis_err(op: &str, e: redis::RedisError) -> AuthError {
    warn!(op, error = %e, "redis command failed");
    AuthError::Unavailable(format!("redis {op}: {e}"))
}

/// Redis-backed refresh-token store.
pub struct RedisRefreshStore {
    conn: ConnectionManager,
    rotate_script: Script,
    ttl: Duration,
}

impl RedisRefreshStore {
    /// Connect to Redis at `url` (e.g. `redis://localhost:6379`).
    pub async fn connect(url: &str) -> Result<Self, AuthError> {
        let client = redis::Client::open(url).map_err(|e| redis_err("open", e))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| redis_err("connect", e))?;
        info!("refresh-token store connected to redis");
        Ok(Self::new(conn))
    }

    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            rotate_script: Script::new(ROTATE_LUA),
            ttl: REFRESH_TOKEN_TTL,
        }
    }
}

#[async_trait]
impl RefreshTokenStore for RedisRefreshStore {
    async fn store(&self, user_id: i64, token: &str) -> Result<(), AuthError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(refresh_key(user_id))
            .arg(token)
            .arg("EX")
            .arg(self.ttl.as_secs())
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| redis_err("set", e))
    }

    async fn is_valid(&self, user_id: i64, token: &str) -> Result<bool, AuthError> {
        let mut conn = self.conn.clone();
        let stored: Option<String> = redis::cmd("GET")
            .arg(refresh_key(user_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_err("get", e))?;
        Ok(stored.as_deref() == Some(token))
    }

    async fn rotate(
        &self,
        user_id: i64,
        old_token: &str,
        new_token: &str,
    ) -> Result<(), AuthError> {
        let mut conn = self.conn.clone();
        let swapped: i64 = self
            .rotate_script
            .key(refresh_key(user_id))
            .arg(old_token)
            .arg(new_token)
            .arg(self.ttl.as_secs())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| redis_err("rotate", e))?;
        if swapped == 1 {
            Ok(())
        } else {
            Err(AuthError::StaleToken)
        }
    }

    async fn revoke(&self, user_id: i64) -> Result<(), AuthError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(refresh_key(user_id))
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| redis_err("del", e))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

// =============================================================================
// Disabled
// =============================================================================

/// Permissive store for cache-less deployments.
///
/// Every operation succeeds and `is_valid` always returns true, so logout does
/// not invalidate refresh tokens and superseded tokens can be replayed until
/// they expire.
pub struct DisabledRefreshStore {
    _private: (),
}

impl DisabledRefreshStore {
    pub fn new() -> Self {
        warn!("refresh-token cache is DISABLED: refresh tokens cannot be revoked or rotated");
        Self { _private: () }
    }
}

impl Default for DisabledRefreshStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RefreshTokenStore for DisabledRefreshStore {
    async fn store(&self, _user_id: i64, _token: &str) -> Result<(), AuthError> {
        Ok(())
    }

    async fn is_valid(&self, _user_id: i64, _token: &str) -> Result<bool, AuthError> {
        Ok(true)
    }

    async fn rotate(&self, _user_id: i64, _old: &str, _new: &str) -> Result<(), AuthError> {
        Ok(())
    }

    async fn revoke(&self, _user_id: i64) -> Result<(), AuthError> {
        Ok(())
    }

    fn is_enforcing(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Debug, Clone)]
struct StoredToken {
    token: String,
    expires_at: Instant,
}

impl StoredToken {
    fn new(token: &str, ttl: Duration) -> Self {
        Self {
            token: token.to_string(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// In-process store keyed by user id.
#[derive(Debug)]
pub struct MemoryRefreshStore {
    entries: DashMap<i64, StoredToken>,
    ttl: Duration,
}

impl MemoryRefreshStore {
    pub fn new() -> Self {
        Self::with_ttl(REFRESH_TOKEN_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Number of users with a live refresh token.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryRefreshStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryRefreshStore {
    async fn store(&self, user_id: i64, token: &str) -> Result<(), AuthError> {
        self.entries
            .insert(user_id, StoredToken::new(token, self.ttl));
        Ok(())
    }

    async fn is_valid(&self, user_id: i64, token: &str) -> Result<bool, AuthError> {
        Ok(self
            .entries
            .get(&user_id)
            .is_some_and(|e| e.is_live() && e.token == token))
    }

    async fn rotate(
        &self,
        user_id: i64,
        old_token: &str,
        new_token: &str,
    ) -> Result<(), AuthError> {
        // The shard write lock is held for the whole check-and-set.
        match self.entries.get_mut(&user_id) {
            Some(mut entry) if entry.is_live() && entry.token == old_token => {
                *entry = StoredToken::new(new_token, self.ttl);
                Ok(())
            }
            _ => Err(AuthError::StaleToken),
        }
    }

    async fn revoke(&self, user_id: i64) -> Result<(), AuthError> {
        self.entries.remove(&user_id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn key_format() {
        assert_eq!(refresh_key(17), "refresh:17");
    }

    #[tokio::test]
    async fn memory_store_validates_exact_token() {
        let store = MemoryRefreshStore::new();
        store.store(1, "tok-a").await.unwrap();
        assert!(store.is_valid(1, "tok-a").await.unwrap());
        assert!(!store.is_valid(1, "tok-b").await.unwrap());
        assert!(!store.is_valid(2, "tok-a").await.unwrap());
    }

    #[tokio::test]
    async fn store_overwrites_previous_token() {
        let store = MemoryRefreshStore::new();
        store.store(1, "tok-a").await.unwrap();
        store.store(1, "tok-b").await.unwrap();
        assert!(!store.is_valid(1, "tok-a").await.unwrap());
        assert!(store.is_valid(1, "tok-b").await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn rotate_requires_current_token() {
        let store = MemoryRefreshStore::new();
        store.store(1, "tok-a").await.unwrap();
        store.rotate(1, "tok-a", "tok-b").await.unwrap();
        assert!(store.is_valid(1, "tok-b").await.unwrap());
        assert!(matches!(
            store.rotate(1, "tok-a", "tok-c").await,
            Err(AuthError::StaleToken)
        ));
        assert!(store.is_valid(1, "tok-b").await.unwrap());
    }

    #[tokio::test]
    async fn rotate_without_stored_token_is_stale() {
        let store = MemoryRefreshStore::new();
        assert!(matches!(
            store.rotate(1, "tok-a", "tok-b").await,
            Err(AuthError::StaleToken)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_rotation_succeeds_once() {
        let store = Arc::new(MemoryRefreshStore::new());
        store.store(5, "old").await.unwrap();

        let a = {
            let store = store.clone();
            tokio::spawn(async move { store.rotate(5, "old", "new-a").await })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move { store.rotate(5, "old", "new-b").await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let stale = results
            .iter()
            .filter(|r| matches!(r, Err(AuthError::StaleToken)))
            .count();
        assert_eq!((ok, stale), (1, 1));
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let store = MemoryRefreshStore::new();
        store.store(1, "tok").await.unwrap();
        store.revoke(1).await.unwrap();
        store.revoke(1).await.unwrap();
        assert!(!store.is_valid(1, "tok").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn expired_entries_are_invalid() {
        let store = MemoryRefreshStore::with_ttl(Duration::ZERO);
        store.store(1, "tok").await.unwrap();
        assert!(!store.is_valid(1, "tok").await.unwrap());
        assert!(matches!(
            store.rotate(1, "tok", "next").await,
            Err(AuthError::StaleToken)
        ));
    }

    #[tokio::test]
    async fn disabled_store_trusts_everything() {
        let store = DisabledRefreshStore::new();
        assert!(!store.is_enforcing());
        store.store(1, "tok").await.unwrap();
        assert!(store.is_valid(1, "anything").await.unwrap());
        store.rotate(1, "x", "y").await.unwrap();
        store.revoke(1).await.unwrap();
        assert!(store.is_valid(1, "tok").await.unwrap());
    }
}
