//! Redis-backed security stores: token revocation entries and sliding-window
//! rate-limit counters. Both live in the same instance under distinct key
//! namespaces (`token:blacklist:*` and `rl:*`).

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use uuid::Uuid;

use crate::error::AppError;

/// Revocation entries keyed by token jti, self-expiring via TTL.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Blacklist a token for its remaining lifetime. Idempotent; the TTL is
    /// clamped to at least one second so the entry always lands.
    async fn blacklist(&self, token_jti: &str, remaining_seconds: i64) -> Result<(), AppError>;

    /// Point lookup. Failure surfaces as `StoreUnavailable` so the caller can
    /// apply the environment's fail-open/fail-closed policy.
    async fn is_revoked(&self, token_jti: &str) -> Result<bool, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

/// One admitted-or-not observation from the sliding window.
#[derive(Debug, Clone)]
pub struct WindowSample {
    /// Requests inside the window, including the one just recorded.
    pub count: u64,
    /// Score of the oldest surviving entry, for retry-after computation.
    pub oldest_ms: Option<i64>,
    /// Member recorded for this request; used to discount it later.
    pub member: String,
}

/// Ordered per-key request timestamps with range-removal-by-score.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Trim entries outside the window, record this request at `now_ms`,
    /// and report the surviving count. The key self-expires after one
    /// window so abandoned keys cost nothing.
    async fn record_request(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
    ) -> Result<WindowSample, AppError>;

    /// Remove a previously recorded request (successful auth attempts are
    /// not counted against the limit).
    async fn discount_request(&self, key: &str, member: &str) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct RedisService {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisService {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, AppError> {
        tracing::info!(url = %config.url, "Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        // Use ConnectionManager for automatic reconnection
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            AppError::StoreUnavailable(anyhow::anyhow!("Failed to connect to Redis: {}", e))
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }

    fn blacklist_key(token_jti: &str) -> String {
        format!("token:blacklist:{}", token_jti)
    }
}

#[async_trait]
impl RevocationStore for RedisService {
    async fn blacklist(&self, token_jti: &str, remaining_seconds: i64) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let key = Self::blacklist_key(token_jti);

        redis::cmd("SET")
            .arg(&key)
            .arg("revoked")
            .arg("EX")
            .arg(remaining_seconds.max(1))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| AppError::StoreUnavailable(anyhow::anyhow!("Failed to blacklist token: {}", e)))
    }

    async fn is_revoked(&self, token_jti: &str) -> Result<bool, AppError> {
        let mut conn = self.manager.clone();
        let key = Self::blacklist_key(token_jti);

        let exists: bool = redis::cmd("EXISTS")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::StoreUnavailable(anyhow::anyhow!("Failed to check blacklist: {}", e)))?;

        Ok(exists)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| AppError::StoreUnavailable(anyhow::anyhow!("Redis health check failed: {}", e)))
    }
}

#[async_trait]
impl RateLimitStore for RedisService {
    async fn record_request(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
    ) -> Result<WindowSample, AppError> {
        let mut conn = self.manager.clone();
        let member = format!("{}-{}", now_ms, Uuid::new_v4());
        let ttl_seconds = (window_ms + 999) / 1000;

        // Trim + insert + count as one MULTI/EXEC round trip, so concurrent
        // requests cannot both observe a pre-insertion count.
        let (count, oldest): (u64, Vec<(String, i64)>) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(0)
            .arg(now_ms - window_ms)
            .ignore()
            .cmd("ZADD")
            .arg(key)
            .arg(now_ms)
            .arg(&member)
            .ignore()
            .cmd("ZCARD")
            .arg(key)
            .cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_seconds)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                AppError::StoreUnavailable(anyhow::anyhow!("Failed to record request: {}", e))
            })?;

        Ok(WindowSample {
            count,
            oldest_ms: oldest.first().map(|(_, score)| *score),
            member,
        })
    }

    async fn discount_request(&self, key: &str, member: &str) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        redis::cmd("ZREM")
            .arg(key)
            .arg(member)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| {
                AppError::StoreUnavailable(anyhow::anyhow!("Failed to discount request: {}", e))
            })
    }
}

/// Stand-in used when Redis is unreachable at startup. Every lookup reports
/// `StoreUnavailable` so callers apply the fail-open/fail-closed policy.
pub struct NullSecurityStore;

#[async_trait]
impl RevocationStore for NullSecurityStore {
    async fn blacklist(&self, _token_jti: &str, _remaining_seconds: i64) -> Result<(), AppError> {
        Err(AppError::StoreUnavailable(anyhow::anyhow!(
            "Revocation store is offline"
        )))
    }

    async fn is_revoked(&self, _token_jti: &str) -> Result<bool, AppError> {
        Err(AppError::StoreUnavailable(anyhow::anyhow!(
            "Revocation store is offline"
        )))
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Err(AppError::StoreUnavailable(anyhow::anyhow!(
            "Revocation store is offline"
        )))
    }
}

/// In-memory implementation for tests.
#[derive(Default)]
pub struct MockSecurityStore {
    blacklisted: std::sync::Mutex<std::collections::HashSet<String>>,
    windows: std::sync::Mutex<std::collections::HashMap<String, Vec<(i64, String)>>>,
}

impl MockSecurityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevocationStore for MockSecurityStore {
    async fn blacklist(&self, token_jti: &str, _remaining_seconds: i64) -> Result<(), AppError> {
        self.blacklisted
            .lock()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Mock store mutex poisoned: {}", e)))?
            .insert(token_jti.to_string());
        Ok(())
    }

    async fn is_revoked(&self, token_jti: &str) -> Result<bool, AppError> {
        let contains = self
            .blacklisted
            .lock()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Mock store mutex poisoned: {}", e)))?
            .contains(token_jti);
        Ok(contains)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[async_trait]
impl RateLimitStore for MockSecurityStore {
    async fn record_request(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
    ) -> Result<WindowSample, AppError> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Mock store mutex poisoned: {}", e)))?;
        let entries = windows.entry(key.to_string()).or_default();
        entries.retain(|(ts, _)| *ts > now_ms - window_ms);

        let member = format!("{}-{}", now_ms, Uuid::new_v4());
        entries.push((now_ms, member.clone()));

        Ok(WindowSample {
            count: entries.len() as u64,
            oldest_ms: entries.iter().map(|(ts, _)| *ts).min(),
            member,
        })
    }

    async fn discount_request(&self, key: &str, member: &str) -> Result<(), AppError> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Mock store mutex poisoned: {}", e)))?;
        if let Some(entries) = windows.get_mut(key) {
            entries.retain(|(_, m)| m != member);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_blacklist_round_trip() {
        let store = MockSecurityStore::new();
        assert!(!store.is_revoked("jti-1").await.unwrap());

        store.blacklist("jti-1", 3600).await.unwrap();
        assert!(store.is_revoked("jti-1").await.unwrap());
        assert!(!store.is_revoked("jti-2").await.unwrap());
    }

    #[tokio::test]
    async fn mock_window_trims_and_counts() {
        let store = MockSecurityStore::new();

        let a = store.record_request("rl:test", 1_000, 10_000).await.unwrap();
        assert_eq!(a.count, 1);

        let b = store.record_request("rl:test", 2_000, 10_000).await.unwrap();
        assert_eq!(b.count, 2);
        assert_eq!(b.oldest_ms, Some(1_000));

        // First entry falls outside the window.
        let c = store.record_request("rl:test", 12_000, 10_000).await.unwrap();
        assert_eq!(c.count, 2);
        assert_eq!(c.oldest_ms, Some(2_000));
    }

    #[tokio::test]
    async fn discount_removes_only_the_member() {
        let store = MockSecurityStore::new();
        let a = store.record_request("rl:auth", 1_000, 10_000).await.unwrap();
        store.record_request("rl:auth", 2_000, 10_000).await.unwrap();

        store.discount_request("rl:auth", &a.member).await.unwrap();
        let c = store.record_request("rl:auth", 3_000, 10_000).await.unwrap();
        assert_eq!(c.count, 2);
        assert_eq!(c.oldest_ms, Some(2_000));
    }

    #[tokio::test]
    async fn null_store_reports_unavailable() {
        let store = NullSecurityStore;
        assert!(matches!(
            store.is_revoked("jti").await,
            Err(AppError::StoreUnavailable(_))
        ));
    }
}
