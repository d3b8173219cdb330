//! In-process storage for caches and live execution monitors
//!
//! Services hold these behind `Arc<dyn CacheStore<_>>` / `MonitorRegistry`
//! so a shared backend can replace the in-memory maps without touching the
//! orchestration code.

mod memory;
mod monitors;

pub use memory::MemoryCache;
pub use monitors::MonitorRegistry;

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Cached value with its insertion time and lifetime
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub timestamp: Instant,
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            timestamp: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.timestamp) >= self.ttl
    }
}

/// Keyed TTL cache
#[async_trait]
pub trait CacheStore<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Fetch a live entry; expired entries are never returned
    async fn get(&self, key: &str) -> Option<V>;

    async fn put(&self, key: String, value: V, ttl: Duration);

    async fn remove(&self, key: &str) -> Option<V>;

    /// Drop expired entries, returning how many were removed
    async fn sweep(&self) -> usize;

    async fn len(&self) -> usize;
}
