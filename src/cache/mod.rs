//! Cache-aside helpers for dashboard statistics, recent orders and the
//! approved-voucher list.
//!
//! Failures of the cache never fail a request: reads degrade to a recompute and
//! writes are logged and dropped.

use dashmap::DashMap;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl From<CacheError> for crate::errors::ServiceError {
    fn from(err: CacheError) -> Self {
        crate::errors::ServiceError::CacheError(err.to_string())
    }
}

/// Cache key layout
pub mod keys {
    use uuid::Uuid;

    pub const APPROVED_VOUCHERS: &str = "vouchers:approved";

    pub fn enterprise_stats(enterprise_id: Uuid) -> String {
        format!("enterprise:{}:stats", enterprise_id)
    }

    pub fn enterprise_recent_orders(enterprise_id: Uuid) -> String {
        format!("enterprise:{}:recent_orders", enterprise_id)
    }
}

#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;
    async fn clear(&self) -> Result<(), CacheError>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|expires_at| Instant::now() >= expires_at)
            .unwrap_or(false)
    }
}

/// Process-local cache, used when no Redis URL is configured
#[derive(Debug, Clone, Default)]
pub struct InMemoryCache {
    store: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        {
            let store = self.store.read().await;
            match store.get(key) {
                Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        self.store.write().await.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.store
            .write()
            .await
            .insert(key.to_string(), CacheEntry::new(value.to_string(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.store.write().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self
            .store
            .read()
            .await
            .get(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false))
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.store.write().await.clear();
        Ok(())
    }
}

/// Redis-backed cache shared across instances; keys are prefixed with a namespace
#[derive(Clone)]
pub struct RedisCache {
    client: Arc<redis::Client>,
    namespace: String,
}

impl RedisCache {
    pub fn new(client: Arc<redis::Client>, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

#[async_trait::async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.client.get_async_connection().await?;
        Ok(conn.get(self.key(key)).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.client.get_async_connection().await?;
        match ttl {
            Some(ttl) => {
                let secs = ttl.as_secs().max(1) as usize;
                let _: () = conn.set_ex(self.key(key), value, secs).await?;
            }
            None => {
                let _: () = conn.set(self.key(key), value).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.client.get_async_connection().await?;
        let _: () = conn.del(self.key(key)).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.client.get_async_connection().await?;
        Ok(conn.exists(self.key(key)).await?)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut conn = self.client.get_async_connection().await?;
        let keys: Vec<String> = conn.keys(format!("{}:*", self.namespace)).await?;
        if !keys.is_empty() {
            let _: () = conn.del(keys).await?;
        }
        Ok(())
    }
}

/// A value read through the cache, tagged with where it came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cached<T> {
    pub data: T,
    pub from_cache: bool,
}

/// Typed cache-aside wrapper with per-key single flight
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    default_ttl: Duration,
    inflight: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>, default_ttl: Duration) -> Self {
        Self {
            backend,
            default_ttl,
            inflight: Arc::new(DashMap::new()),
        }
    }

    pub fn in_memory(default_ttl: Duration) -> Self {
        Self::new(Arc::new(InMemoryCache::new()), default_ttl)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub async fn get_cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.backend.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(key, error = %err, "Discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(key, error = %err, "Cache read failed");
                None
            }
        }
    }

    pub async fn set_cached<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(key, error = %err, "Failed to serialize cache entry");
                return;
            }
        };
        if let Err(err) = self.backend.set(key, &raw, Some(ttl)).await {
            warn!(key, error = %err, "Cache write failed");
        }
    }

    pub async fn invalidate(&self, key: &str) {
        match self.backend.delete(key).await {
            Ok(()) => debug!(key, "Cache entry invalidated"),
            Err(err) => warn!(key, error = %err, "Cache invalidation failed"),
        }
    }

    /// Drops the dashboard entries of one enterprise after its orders change.
    pub async fn invalidate_enterprise(&self, enterprise_id: Uuid) {
        self.invalidate(&keys::enterprise_stats(enterprise_id)).await;
        self.invalidate(&keys::enterprise_recent_orders(enterprise_id))
            .await;
    }

    /// Returns the cached value for `key`, or computes, stores and returns it.
    ///
    /// Concurrent misses on the same key wait for the first caller and then
    /// read its result instead of recomputing.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<Cached<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(data) = self.get_cached(key).await {
            return Ok(Cached {
                data,
                from_cache: true,
            });
        }

        // Declared before the lock so it drops after it.
        let _slot = InflightSlot {
            inflight: &self.inflight,
            key,
        };
        let lock = self
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Filled while we waited on the lock
        if let Some(data) = self.get_cached(key).await {
            return Ok(Cached {
                data,
                from_cache: true,
            });
        }

        let result = compute().await;
        if let Ok(data) = &result {
            self.set_cached(key, data, ttl).await;
        }

        result.map(|data| Cached {
            data,
            from_cache: false,
        })
    }
}

/// Removes the single-flight entry of a key once no caller holds its lock,
/// including when the computing future is cancelled.
struct InflightSlot<'a> {
    inflight: &'a DashMap<String, Arc<Mutex<()>>>,
    key: &'a str,
}

impl Drop for InflightSlot<'_> {
    fn drop(&mut self) {
        // Only the map's own reference is left once every caller is done.
        self.inflight
            .remove_if(self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
