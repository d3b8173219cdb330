//! DashMap-backed TTL cache with a size cap

use super::{CacheEntry, CacheStore};

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub struct MemoryCache<V> {
    name: &'static str,
    entries: DashMap<String, CacheEntry<V>>,
    max_entries: usize,
}

impl<V> MemoryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, max_entries: usize) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Make room for one more entry: expired first, then the oldest
    fn enforce_capacity(&self) {
        if self.entries.len() < self.max_entries {
            return;
        }

        self.remove_expired();

        while self.entries.len() >= self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().timestamp)
                .map(|e| e.key().clone());

            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                    debug!("Cache {} at capacity, evicted {}", self.name, key);
                }
                None => break,
            }
        }
    }
}

#[async_trait]
impl<V> CacheStore<V> for MemoryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let hit = self.entries.get(key).and_then(|entry| {
            if entry.is_expired(now) {
                None
            } else {
                Some(entry.value.clone())
            }
        });

        if hit.is_none() {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        hit
    }

    async fn put(&self, key: String, value: V, ttl: Duration) {
        if !self.entries.contains_key(&key) {
            self.enforce_capacity();
        }
        self.entries.insert(key, CacheEntry::new(value, ttl));
    }

    async fn remove(&self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    async fn sweep(&self) -> usize {
        let removed = self.remove_expired();
        if removed > 0 {
            debug!("Cache {}: swept {} expired entries", self.name, removed);
        }
        removed
    }

    async fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_are_never_served_past_ttl() {
        let cache = MemoryCache::new("test", 10);
        cache
            .put("k".to_string(), 7u32, Duration::from_secs(30))
            .await;

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cache.get("k").await, Some(7));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_expired() {
        let cache = MemoryCache::new("test", 10);
        cache.put("short".into(), 1u32, Duration::from_secs(5)).await;
        cache.put("long".into(), 2u32, Duration::from_secs(60)).await;

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.sweep().await, 1);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("long").await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn size_cap_evicts_oldest() {
        let cache = MemoryCache::new("test", 2);
        cache.put("a".into(), 1u32, Duration::from_secs(60)).await;
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.put("b".into(), 2u32, Duration::from_secs(60)).await;
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.put("c".into(), 3u32, Duration::from_secs(60)).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("c").await, Some(3));
    }
}
