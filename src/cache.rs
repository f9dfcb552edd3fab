use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Entry stored in the local DashMap with an expiry timestamp.
#[derive(Clone)]
pub(crate) struct CacheEntry {
    value: String,
    pub(crate) expires_at: Instant,
}

impl CacheEntry {
    fn new(value: String, ttl_secs: u64) -> Self {
        Self {
            value,
            expires_at: Instant::now() + Duration::from_secs(ttl_secs),
        }
    }

    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }

    fn ttl_secs(&self) -> u64 {
        self.expires_at
            .saturating_duration_since(Instant::now())
            .as_secs()
    }
}

/// How an increment treats the key's expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// TTL is set on the first increment only (fixed rate-limit window).
    Window,
    /// TTL is refreshed on every increment (idle timeout).
    Idle,
}

/// Result of an atomic increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub value: u64,
    /// Seconds until the key expires.
    pub ttl_secs: u64,
}

/// Shared coordination state: Redis when configured, process-local otherwise.
///
/// All read-modify-write operations are atomic: on Redis through Lua scripts,
/// locally through DashMap entry locks. If Redis errors at runtime the call
/// degrades to the local map for that operation and logs a warning. Local
/// counting only coordinates callers inside this process.
#[derive(Clone)]
pub struct CoordinationStore {
    pub(crate) local: Arc<DashMap<String, CacheEntry>>,
    redis: Option<ConnectionManager>,
}

const INCREMENT_SCRIPT: &str = r#"
    local current = redis.call("INCR", KEYS[1])
    if current == 1 or ARGV[2] == "1" then
        redis.call("EXPIRE", KEYS[1], ARGV[1])
    end
    local ttl = redis.call("TTL", KEYS[1])
    return {current, ttl}
"#;

impl CoordinationStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            local: Arc::new(DashMap::new()),
            redis: Some(redis),
        }
    }

    /// A store with no Redis behind it.
    pub fn local_only() -> Self {
        Self {
            local: Arc::new(DashMap::new()),
            redis: None,
        }
    }

    /// Connect to Redis if a URL is given; fall back to local-only if the
    /// connection cannot be established.
    pub async fn connect(redis_url: Option<&str>) -> Self {
        let Some(url) = redis_url else {
            tracing::info!("no REDIS_URL configured, coordination state is process-local");
            return Self::local_only();
        };
        let conn = match redis::Client::open(url) {
            Ok(client) => ConnectionManager::new(client).await,
            Err(e) => Err(e),
        };
        match conn {
            Ok(conn) => Self::new(conn),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "redis unavailable, degrading to process-local rate limiting and progress"
                );
                Self::local_only()
            }
        }
    }

    /// Whether state is shared with other processes.
    pub fn is_shared(&self) -> bool {
        self.redis.is_some()
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if let Some(mut conn) = self.redis.clone() {
            match conn.get::<_, Option<String>>(key).await {
                Ok(v) => return v.and_then(|s| serde_json::from_str(&s).ok()),
                Err(e) => tracing::warn!(key, error = %e, "redis GET failed, reading local state"),
            }
        }

        let entry = self.local.get(key)?;
        if entry.is_live() {
            return serde_json::from_str(&entry.value).ok();
        }
        // expired, drop the ref before removing
        drop(entry);
        self.remove_if_expired(key);
        None
    }

    /// Remove `key` only if it is still expired; a concurrent write may have
    /// replaced it since it was read.
    fn remove_if_expired(&self, key: &str) -> bool {
        self.local.remove_if(key, |_, e| !e.is_live()).is_some()
    }

    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> anyhow::Result<()> {
        let json = serde_json::to_string(value)?;
        self.set_raw(key, json, ttl_secs).await;
        Ok(())
    }

    async fn set_raw(&self, key: &str, value: String, ttl_secs: u64) {
        if let Some(mut conn) = self.redis.clone() {
            match conn.set_ex::<_, _, ()>(key, value.as_str(), ttl_secs).await {
                Ok(()) => return,
                Err(e) => tracing::warn!(key, error = %e, "redis SETEX failed, writing local state"),
            }
        }
        self.local
            .insert(key.to_string(), CacheEntry::new(value, ttl_secs));
    }

    /// Atomic INCR with expiry.
    pub async fn increment(&self, key: &str, ttl_secs: u64, expiry: Expiry) -> Counter {
        if let Some(mut conn) = self.redis.clone() {
            let refresh = if expiry == Expiry::Idle { "1" } else { "0" };
            let result: redis::RedisResult<(u64, i64)> = redis::Script::new(INCREMENT_SCRIPT)
                .key(key)
                .arg(ttl_secs)
                .arg(refresh)
                .invoke_async(&mut conn)
                .await;
            match result {
                Ok((value, ttl)) => {
                    return Counter {
                        value,
                        ttl_secs: ttl.max(0) as u64,
                    }
                }
                Err(e) => tracing::warn!(key, error = %e, "redis INCR failed, counting locally"),
            }
        }
        self.increment_local(key, ttl_secs, expiry)
    }

    fn increment_local(&self, key: &str, ttl_secs: u64, expiry: Expiry) -> Counter {
        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut entry = self
            .local
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry::new("0".to_string(), ttl_secs));
        if !entry.is_live() {
            *entry = CacheEntry::new("0".to_string(), ttl_secs);
        }
        let value = entry.value.parse::<u64>().unwrap_or(0) + 1;
        entry.value = value.to_string();
        if expiry == Expiry::Idle {
            entry.expires_at = Instant::now() + Duration::from_secs(ttl_secs);
        }
        Counter {
            value,
            ttl_secs: entry.ttl_secs(),
        }
    }

    /// Overwrite a counter (e.g. to mark a bucket exhausted).
    pub async fn set_counter(&self, key: &str, value: u64, ttl_secs: u64) {
        self.set_raw(key, value.to_string(), ttl_secs).await;
    }

    /// Current counter value and remaining TTL; `None` if absent or expired.
    pub async fn counter(&self, key: &str) -> Option<Counter> {
        if let Some(mut conn) = self.redis.clone() {
            let result: redis::RedisResult<(Option<u64>, i64)> = redis::pipe()
                .get(key)
                .ttl(key)
                .query_async(&mut conn)
                .await;
            match result {
                Ok((value, ttl)) => {
                    return value.map(|value| Counter {
                        value,
                        ttl_secs: ttl.max(0) as u64,
                    })
                }
                Err(e) => tracing::warn!(key, error = %e, "redis GET/TTL failed, reading local counter"),
            }
        }

        let entry = self.local.get(key)?;
        if !entry.is_live() {
            return None;
        }
        Some(Counter {
            value: entry.value.parse().unwrap_or(0),
            ttl_secs: entry.ttl_secs(),
        })
    }

    /// Push the expiry of an existing key forward.
    pub async fn touch(&self, key: &str, ttl_secs: u64) {
        if let Some(mut conn) = self.redis.clone() {
            match conn.expire::<_, ()>(key, ttl_secs as i64).await {
                Ok(()) => return,
                Err(e) => tracing::warn!(key, error = %e, "redis EXPIRE failed, touching local state"),
            }
        }
        if let Some(mut entry) = self.local.get_mut(key) {
            entry.expires_at = Instant::now() + Duration::from_secs(ttl_secs);
        }
    }

    /// Remove all locally-expired entries. Redis expires its own keys.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.local.len();
        self.local.retain(|_, entry| entry.expires_at > now);
        before - self.local.len()
    }

    /// Current number of entries in the local map (for metrics / debugging).
    pub fn local_len(&self) -> usize {
        self.local.len()
    }
}
