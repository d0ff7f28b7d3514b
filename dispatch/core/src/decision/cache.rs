//! Decision cache with TTL expiry and oldest-first eviction
//!
//! Maps a situation fingerprint to the decision computed for it. The cache is
//! process-local and bounded:
//!
//! - **TTL**: entries older than the TTL are reported absent on lookup. They
//!   are not removed until evicted, overwritten or purged
//! - **Capacity**: inserting a new key into a full cache evicts the single
//!   entry with the oldest creation time
//! - **Hit counting**: each successful lookup bumps the entry's hit counter
//!   under the read lock

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Default maximum number of entries
pub const DEFAULT_MAX_SIZE: usize = 100;

/// Default entry lifetime
pub const DEFAULT_TTL: Duration = Duration::from_secs(10);

/// Upper bound on slots reserved up front; larger caches grow on demand
const MAX_PREALLOCATED: usize = 1024;

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    hits: AtomicU64,
}

/// Cache counters
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries currently stored, expired ones included
    pub entries: usize,
    /// Capacity
    pub max_size: usize,
    /// Lookups that returned a value
    pub hits: u64,
    /// Lookups that found nothing or an expired entry
    pub misses: u64,
    /// Entries removed to make room
    pub evictions: u64,
}

impl CacheStats {
    /// Hits as a fraction of all lookups (0.0 when there were none)
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Bounded TTL cache keyed by fingerprint
#[derive(Debug)]
pub struct DecisionCache<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    max_size: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> DecisionCache<V> {
    /// Create a cache holding at most `max_size` entries for `ttl` each
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity(max_size.min(MAX_PREALLOCATED))),
            max_size: max_size.max(1),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Entry lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Capacity
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Value for `key` if present and younger than the TTL
    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if entry.created_at.elapsed() <= self.ttl => {
                entry.hits.fetch_add(1, Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `value` under `key`, evicting the oldest entry if a new key
    /// would overflow the cache
    pub fn insert(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let mut entries = self.entries.write();

        if !entries.contains_key(&key) && entries.len() >= self.max_size {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.created_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                created_at: Instant::now(),
                hits: AtomicU64::new(0),
            },
        );
    }

    /// How many times `key` has been served, if stored
    pub fn hit_count(&self, key: &str) -> Option<u64> {
        self.entries
            .read()
            .get(key)
            .map(|entry| entry.hits.load(Ordering::Relaxed))
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.created_at.elapsed() <= self.ttl);
        before - entries.len()
    }

    /// Remove everything
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Counter snapshot
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            max_size: self.max_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl<V: Clone> Default for DecisionCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE, DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Expiry
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_entry_visible_until_ttl() {
        let cache = DecisionCache::new(10, Duration::from_secs(10));
        cache.insert("k", 1);

        tokio::time::advance(Duration::from_millis(9_990)).await;
        assert_eq!(cache.get("k"), Some(1));

        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k"), None);
        // Lazily expired, still occupying a slot
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_huge_capacity_allocates_lazily() {
        let cache = DecisionCache::new(usize::MAX, Duration::from_secs(10));
        assert_eq!(cache.max_size(), usize::MAX);

        cache.insert("k", 7);
        assert_eq!(cache.get("k"), Some(7));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = DecisionCache::new(10, Duration::from_secs(1));
        cache.insert("old", 1);
        tokio::time::advance(Duration::from_secs(2)).await;
        cache.insert("new", 2);

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("new"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_refreshes_creation_time() {
        let cache = DecisionCache::new(10, Duration::from_secs(10));
        cache.insert("k", 1);
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.insert("k", 2);
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get("k"), Some(2));
    }

    // =========================================================================
    // Eviction
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_full_cache_evicts_oldest() {
        let cache = DecisionCache::new(3, Duration::from_secs(60));
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            cache.insert(*key, i);
            tokio::time::advance(Duration::from_millis(10)).await;
        }

        cache.insert("d", 3);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(1));
        assert_eq!(cache.get("d"), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_at_capacity_does_not_evict() {
        let cache = DecisionCache::new(2, Duration::from_secs(60));
        cache.insert("a", 1);
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.insert("b", 2);
        cache.insert("b", 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.stats().evictions, 0);
    }

    // =========================================================================
    // Counters
    // =========================================================================

    #[test]
    fn test_hit_counting() {
        let cache: DecisionCache<&str> = DecisionCache::default();
        cache.insert("k", "v");
        assert_eq!(cache.get("k"), Some("v"));
        assert_eq!(cache.get("k"), Some("v"));
        assert_eq!(cache.get("missing"), None);

        assert_eq!(cache.hit_count("k"), Some(2));
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_defaults() {
        let cache: DecisionCache<u8> = DecisionCache::default();
        assert_eq!(cache.max_size(), 100);
        assert_eq!(cache.ttl(), Duration::from_secs(10));
        assert!(cache.is_empty());
        assert_eq!(cache.stats().hit_rate(), 0.0);
    }
}
