use anyhow::{Context, Result};
use lru::LruCache;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::health::DependencyStatus;
use crate::metrics;

pub const MAX_MEMORY_ENTRIES: usize = 5000;
const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// JSON value cache backed by Redis when configured, otherwise by a bounded in-process LRU.
///
/// Cache failures never fail the caller: reads degrade to a miss and writes are dropped
/// with a warning.
pub struct Cache {
    backend: Backend,
}

enum Backend {
    Redis(ConnectionManager),
    Memory(Mutex<LruCache<String, MemoryEntry>>),
}

struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

impl Cache {
    pub fn memory(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            backend: Backend::Memory(Mutex::new(LruCache::new(capacity))),
        }
    }

    pub async fn connect_redis(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid REDIS_URL")?;
        let manager = tokio::time::timeout(REDIS_CONNECT_TIMEOUT, client.get_connection_manager())
            .await
            .context("redis connect timed out")?
            .context("redis connect failed")?;
        Ok(Self {
            backend: Backend::Redis(manager),
        })
    }

    pub async fn from_url(redis_url: Option<&str>) -> Result<Self> {
        match redis_url {
            Some(url) => {
                let cache = Self::connect_redis(url).await?;
                tracing::info!("cache backend: redis");
                Ok(cache)
            }
            None => {
                tracing::warn!("REDIS_URL not set, using in-memory cache");
                Ok(Self::memory(MAX_MEMORY_ENTRIES))
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Redis(_) => "redis",
            Backend::Memory(_) => "memory",
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.get_raw(key).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(error = %err, key, "cache read failed");
                None
            }
        };
        let result = raw.and_then(|value| serde_json::from_str::<T>(&value).ok());
        metrics::inc_cache_request(
            self.backend_name(),
            if result.is_some() { "hit" } else { "miss" },
        );
        result
    }

    /// A zero `ttl` stores without expiry.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let serialized = match serde_json::to_string(value) {
            Ok(serialized) => serialized,
            Err(err) => {
                tracing::warn!(error = %err, key, "cache value not serializable");
                return;
            }
        };
        if let Err(err) = self.set_raw(key, serialized, ttl).await {
            tracing::warn!(error = %err, key, "cache write failed");
        }
    }

    pub async fn del(&self, key: &str) {
        let result = match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                conn.del::<_, ()>(key).await.map_err(anyhow::Error::from)
            }
            Backend::Memory(memory) => {
                memory.lock().await.pop(key);
                Ok(())
            }
        };
        if let Err(err) = result {
            tracing::warn!(error = %err, key, "cache delete failed");
        }
    }

    pub async fn ping(&self) -> DependencyStatus {
        match &self.backend {
            Backend::Memory(_) => DependencyStatus::Skipped,
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let pong: redis::RedisResult<String> =
                    redis::cmd("PING").query_async(&mut conn).await;
                match pong {
                    Ok(_) => DependencyStatus::Up,
                    Err(err) => {
                        tracing::warn!(error = %err, "redis ping failed");
                        DependencyStatus::Down
                    }
                }
            }
        }
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let value: Option<String> = conn.get(key).await?;
                Ok(value)
            }
            Backend::Memory(memory) => {
                let mut guard = memory.lock().await;
                let now = Instant::now();
                let expired = match guard.get(key) {
                    Some(entry) if entry.is_expired(now) => true,
                    Some(entry) => return Ok(Some(entry.value.clone())),
                    None => return Ok(None),
                };
                if expired {
                    guard.pop(key);
                }
                Ok(None)
            }
        }
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                if ttl.is_zero() {
                    conn.set::<_, _, ()>(key, value).await?;
                } else {
                    conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                        .await?;
                }
                Ok(())
            }
            Backend::Memory(memory) => {
                let expires_at = if ttl.is_zero() {
                    None
                } else {
                    Some(Instant::now() + ttl)
                };
                memory
                    .lock()
                    .await
                    .put(key.to_string(), MemoryEntry { value, expires_at });
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct ResetEntry {
        code: String,
        user_id: String,
    }

    #[tokio::test]
    async fn memory_cache_roundtrips_json_values() {
        let cache = Cache::memory(16);
        let entry = ResetEntry {
            code: "123456".into(),
            user_id: "u1".into(),
        };
        cache.set("reset:a@b.c", &entry, Duration::from_secs(60)).await;

        let loaded: Option<ResetEntry> = cache.get("reset:a@b.c").await;
        assert_eq!(loaded, Some(entry));

        cache.del("reset:a@b.c").await;
        let gone: Option<ResetEntry> = cache.get("reset:a@b.c").await;
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn memory_cache_expires_entries() {
        let cache = Cache::memory(16);
        cache.set("bl:rt:token", &true, Duration::from_millis(20)).await;
        assert_eq!(cache.get::<bool>("bl:rt:token").await, Some(true));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get::<bool>("bl:rt:token").await, None);
    }

    #[tokio::test]
    async fn memory_cache_evicts_least_recently_used() {
        let cache = Cache::memory(2);
        cache.set("a", &1, Duration::ZERO).await;
        cache.set("b", &2, Duration::ZERO).await;
        assert_eq!(cache.get::<i32>("a").await, Some(1));
        cache.set("c", &3, Duration::ZERO).await;

        assert_eq!(cache.get::<i32>("a").await, Some(1));
        assert_eq!(cache.get::<i32>("b").await, None);
        assert_eq!(cache.get::<i32>("c").await, Some(3));
    }

    #[tokio::test]
    async fn type_mismatch_reads_as_miss() {
        let cache = Cache::memory(4);
        cache.set("k", &"text", Duration::from_secs(5)).await;
        assert_eq!(cache.get::<i64>("k").await, None);
    }

    #[tokio::test]
    async fn memory_backend_reports_skipped_ping() {
        let cache = Cache::memory(4);
        assert_eq!(cache.ping().await, DependencyStatus::Skipped);
        assert_eq!(cache.backend_name(), "memory");
    }
}
