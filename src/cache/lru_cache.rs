use dashmap::DashMap;
use std::{
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tracing::debug;

/// Stored value with its insertion and last access times.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    last_used: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            last_used: now,
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

/// Bounded LRU cache with a per-cache time-to-live.
///
/// Clones share the same storage.
#[derive(Debug)]
pub struct LRUCache<K: Clone + Eq + Hash, V> {
    data: Arc<DashMap<K, CacheEntry<V>>>,
    capacity: usize,
    ttl: Duration,
    stats: Arc<CacheStats>,
}

#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired_removals: AtomicU64,
}

impl<K, V> LRUCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
            ttl,
            stats: Arc::new(CacheStats::default()),
        }
    }

    /// Inserts a value, evicting the least recently used entry when full.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let previous = self.data.insert(key, CacheEntry::new(value)).map(|old| old.value);

        while self.data.len() > self.capacity {
            let oldest = self
                .data
                .iter()
                .min_by_key(|entry| entry.value().last_used)
                .map(|entry| entry.key().clone());

            match oldest {
                Some(key) => {
                    self.data.remove(&key);
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }

        previous
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let expired = match self.data.get_mut(key) {
            Some(mut entry) if !entry.is_expired(self.ttl) => {
                entry.last_used = Instant::now();
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.data.remove(key);
            self.stats.expired_removals.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops expired entries and returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let ttl = self.ttl;
        let before = self.data.len();
        self.data.retain(|_, entry| !entry.is_expired(ttl));
        let removed = before.saturating_sub(self.data.len());

        if removed > 0 {
            self.stats
                .expired_removals
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!("🧹 Removed {} expired cache entries", removed);
        }

        removed
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            expired_removals: self.stats.expired_removals.load(Ordering::Relaxed),
        }
    }
}

impl<K, V> Clone for LRUCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            capacity: self.capacity,
            ttl: self.ttl,
            stats: self.stats.clone(),
        }
    }
}

/// Hit, miss and eviction counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired_removals: u64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }

    pub fn miss_rate(&self) -> f64 {
        1.0 - self.hit_rate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recently_used() {
        let cache: LRUCache<&'static str, u32> = LRUCache::new(2, Duration::from_secs(60));
        cache.insert("a", 1);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("b", 2);
        std::thread::sleep(Duration::from_millis(2));

        // touch "a" so "b" becomes the oldest
        assert_eq!(cache.get(&"a"), Some(1));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("c", 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.metrics().evictions, 1);
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let cache: LRUCache<String, u32> = LRUCache::new(8, Duration::from_millis(1));
        cache.insert("x".to_string(), 1);
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(cache.get(&"x".to_string()), None);
        assert!(cache.is_empty());

        cache.insert("y".to_string(), 2);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.cleanup_expired(), 1);
    }

    #[test]
    fn test_hit_rate() {
        let cache: LRUCache<u8, u8> = LRUCache::new(4, Duration::from_secs(60));
        cache.insert(1, 1);
        cache.get(&1);
        cache.get(&2);
        let metrics = cache.metrics();
        assert_eq!((metrics.hits, metrics.misses), (1, 1));
        assert!((metrics.hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
