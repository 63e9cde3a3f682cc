/// Resolution caching for DID-to-ledger bindings
///
/// The cache is an injected collaborator: the manager only depends on the
/// [`ResolutionCache`] trait. A Redis-backed implementation is provided for
/// deployments that share resolution state across agent instances, and an
/// in-process implementation for embedders and tests.
use crate::error::{VdrError, VdrResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// TTL key-value store mapping a DID to the ledger it last resolved on
#[async_trait]
pub trait ResolutionCache: Send + Sync {
    async fn get_ledger_id(&self, did: &str) -> VdrResult<Option<String>>;

    async fn put_ledger_id(&self, did: &str, ledger_id: &str, ttl: Duration) -> VdrResult<()>;

    async fn invalidate(&self, did: &str) -> VdrResult<()>;
}

/// Redis-backed resolution cache
#[derive(Clone)]
pub struct RedisResolutionCache {
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisResolutionCache {
    /// Connect to Redis at the given URL
    pub async fn new(redis_url: &str) -> VdrResult<Self> {
        info!("Connecting to Redis at {}", redis_url);

        let client = Client::open(redis_url)
            .map_err(|e| VdrError::Cache(format!("Redis client creation failed: {}", e)))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| VdrError::Cache(format!("Redis connection failed: {}", e)))?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            key_prefix: "atlas:did:ledger:".to_string(),
        })
    }

    pub fn with_key_prefix(mut self, prefix: &str) -> Self {
        self.key_prefix = prefix.to_string();
        self
    }

    fn build_key(&self, did: &str) -> String {
        format!("{}{}", self.key_prefix, did)
    }
}

#[async_trait]
impl ResolutionCache for RedisResolutionCache {
    async fn get_ledger_id(&self, did: &str) -> VdrResult<Option<String>> {
        let key = self.build_key(did);
        let mut conn = self.connection.clone();
        let result: Option<String> = conn.get(&key).await.map_err(|e| {
            warn!("Redis GET failed for {}: {}", key, e);
            VdrError::Cache(format!("Cache get failed: {}", e))
        })?;

        match &result {
            Some(_) => debug!("Cache HIT: {}", key),
            None => debug!("Cache MISS: {}", key),
        }
        Ok(result)
    }

    async fn put_ledger_id(&self, did: &str, ledger_id: &str, ttl: Duration) -> VdrResult<()> {
        let key = self.build_key(did);
        debug!("Cache SET: {} -> {} (TTL: {}s)", key, ledger_id, ttl.as_secs());

        let mut conn = self.connection.clone();
        let _: () = conn
            .set_ex(&key, ledger_id, ttl.as_secs())
            .await
            .map_err(|e| {
                warn!("Redis SET failed for {}: {}", key, e);
                VdrError::Cache(format!("Cache set failed: {}", e))
            })?;
        Ok(())
    }

    async fn invalidate(&self, did: &str) -> VdrResult<()> {
        let key = self.build_key(did);
        let mut conn = self.connection.clone();
        let _: () = conn.del(&key).await.map_err(|e| {
            warn!("Redis DELETE failed for {}: {}", key, e);
            VdrError::Cache(format!("Cache delete failed: {}", e))
        })?;
        Ok(())
    }
}

struct MemoryEntry {
    ledger_id: String,
    expires_at: DateTime<Utc>,
}

/// In-process resolution cache with per-entry expiry
#[derive(Default)]
pub struct MemoryResolutionCache {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResolutionCache for MemoryResolutionCache {
    async fn get_ledger_id(&self, did: &str) -> VdrResult<Option<String>> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(did) {
            Some(entry) if entry.expires_at > Utc::now() => Ok(Some(entry.ledger_id.clone())),
            Some(_) => {
                // Expired, drop it on the way out.
                entries.remove(did);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put_ledger_id(&self, did: &str, ledger_id: &str, ttl: Duration) -> VdrResult<()> {
        let ttl = ChronoDuration::from_std(ttl)
            .map_err(|e| VdrError::Cache(format!("TTL out of range: {}", e)))?;
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.insert(
            did.to_string(),
            MemoryEntry {
                ledger_id: ledger_id.to_string(),
                expires_at: Utc::now() + ttl,
            },
        );
        Ok(())
    }

    async fn invalidate(&self, did: &str) -> VdrResult<()> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.remove(did);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_cache_round_trip() {
        let cache = MemoryResolutionCache::new();
        cache
            .put_ledger_id("V4SGRU86Z58d6TV7PBUe6f", "sovrin-main", Duration::from_secs(60))
            .await
            .unwrap();

        let hit = cache.get_ledger_id("V4SGRU86Z58d6TV7PBUe6f").await.unwrap();
        assert_eq!(hit.as_deref(), Some("sovrin-main"));

        let miss = cache.get_ledger_id("unknown").await.unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_memory_cache_expiry() {
        let cache = MemoryResolutionCache::new();
        cache
            .put_ledger_id("V4SGRU86Z58d6TV7PBUe6f", "sovrin-main", Duration::from_secs(0))
            .await
            .unwrap();

        let result = cache.get_ledger_id("V4SGRU86Z58d6TV7PBUe6f").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_memory_cache_invalidate() {
        let cache = MemoryResolutionCache::new();
        cache
            .put_ledger_id("V4SGRU86Z58d6TV7PBUe6f", "sovrin-main", Duration::from_secs(60))
            .await
            .unwrap();
        cache.invalidate("V4SGRU86Z58d6TV7PBUe6f").await.unwrap();
        let result = cache.get_ledger_id("V4SGRU86Z58d6TV7PBUe6f").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_memory_cache_overwrite() {
        let cache = MemoryResolutionCache::new();
        cache
            .put_ledger_id("did", "old-ledger", Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .put_ledger_id("did", "new-ledger", Duration::from_secs(60))
            .await
            .unwrap();
        let hit = cache.get_ledger_id("did").await.unwrap();
        assert_eq!(hit.as_deref(), Some("new-ledger"));
    }

    #[test]
    fn test_redis_key_prefix() {
        // Key construction is pure; connection-dependent paths are covered
        // by deployments with a live Redis.
        let prefix = "atlas:did:ledger:";
        assert_eq!(
            format!("{}{}", prefix, "V4SGRU86Z58d6TV7PBUe6f"),
            "atlas:did:ledger:V4SGRU86Z58d6TV7PBUe6f"
        );
    }
}
