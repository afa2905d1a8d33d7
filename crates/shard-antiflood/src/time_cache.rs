//! Key to expiry store with sweep-based eviction.
//!
//! Entries are only ever removed by [`TimeCache::sweep`] or an explicit
//! [`TimeCache::remove`]. Lookups never evict, so an expired entry stays
//! visible until the next sweep. The cache grows without bound between two
//! sweeps.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Periodic eviction pass, driven by the scheduler.
pub trait Sweeper: Send + Sync {
    /// Remove every expired entry. Returns how many were removed.
    fn sweep(&self) -> usize;
}

#[derive(Debug, Clone)]
struct TimeCacheEntry<V> {
    /// When the entry was last inserted or refreshed.
    refreshed_at: Instant,
    /// Time-to-live counted from `refreshed_at`.
    span: Duration,
    value: V,
}

impl<V> TimeCacheEntry<V> {
    /// `None` when the span reaches past what `Instant` can represent.
    fn expires_at(&self) -> Option<Instant> {
        self.refreshed_at.checked_add(self.span)
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at().is_some_and(|at| now >= at)
    }
}

/// Thread-safe time cache.
///
/// Backed by a sharded map so that concurrent lookups on different keys do
/// not contend, and a sweep only ever holds one shard lock at a time.
pub struct TimeCache<K, V = ()>
where
    K: Eq + Hash,
{
    entries: DashMap<K, TimeCacheEntry<V>>,
}

impl<K, V> TimeCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Insert a key, or overwrite its expiry with `now + span`.
    pub fn add(&self, key: K, span: Duration)
    where
        V: Default,
    {
        self.entries.insert(
            key,
            TimeCacheEntry {
                refreshed_at: Instant::now(),
                span,
                value: V::default(),
            },
        );
    }

    /// Insert or refresh a key.
    ///
    /// An existing entry has its timestamp refreshed and its value replaced,
    /// and keeps the larger of the old and new spans.
    pub fn upsert(&self, key: K, value: V, span: Duration) {
        let now = Instant::now();
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.refreshed_at = now;
                entry.span = entry.span.max(span);
                entry.value = value;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(TimeCacheEntry {
                    refreshed_at: now,
                    span,
                    value,
                });
            }
        }
    }

    /// True if the key is present. Never evicts.
    pub fn has(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Value stored for a key.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Time left before the key becomes eligible for sweeping.
    /// [`Duration::MAX`] for entries that never expire.
    pub fn remaining(&self, key: &K) -> Option<Duration> {
        self.entries.get(key).map(|entry| match entry.expires_at() {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => Duration::MAX,
        })
    }

    /// Remove a key.
    pub fn remove(&self, key: &K) {
        self.entries.remove(key);
    }

    /// Get the number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the current keys.
    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Remove expired entries.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let expired = entry.is_expired(now);
            if expired {
                removed += 1;
            }
            !expired
        });
        removed
    }
}

impl<K, V> Default for TimeCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Sweeper for TimeCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Send + Sync,
{
    fn sweep(&self) -> usize {
        TimeCache::sweep(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> Vec<u8> {
        vec![n; 4]
    }

    #[test]
    fn test_add_and_has() {
        let cache: TimeCache<Vec<u8>> = TimeCache::new();
        assert!(!cache.has(&key(1)));

        cache.add(key(1), Duration::from_secs(60));
        assert!(cache.has(&key(1)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_has_does_not_evict() {
        let cache: TimeCache<Vec<u8>> = TimeCache::new();
        cache.add(key(1), Duration::from_millis(5));

        std::thread::sleep(Duration::from_millis(20));

        // Expired but not swept yet
        assert!(cache.has(&key(1)));
        assert_eq!(cache.remaining(&key(1)), Some(Duration::ZERO));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let cache: TimeCache<Vec<u8>> = TimeCache::new();
        cache.add(key(1), Duration::from_millis(10));
        cache.add(key(2), Duration::from_secs(60));

        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(cache.sweep(), 1);
        assert!(!cache.has(&key(1)));
        assert!(cache.has(&key(2)));
    }

    #[test]
    fn test_sweep_keeps_fresh_entries() {
        let cache: TimeCache<Vec<u8>> = TimeCache::new();
        cache.add(key(1), Duration::from_secs(60));

        assert_eq!(cache.sweep(), 0);
        assert!(cache.has(&key(1)));
    }

    #[test]
    fn test_upsert_keeps_longer_span() {
        let cache: TimeCache<Vec<u8>, &'static str> = TimeCache::new();
        cache.upsert(key(1), "first", Duration::from_secs(60));
        cache.upsert(key(1), "second", Duration::from_millis(1));

        assert_eq!(cache.get(&key(1)), Some("second"));
        let remaining = cache.remaining(&key(1)).unwrap();
        assert!(remaining > Duration::from_secs(50));
    }

    #[test]
    fn test_upsert_refreshes_expired_entry() {
        let cache: TimeCache<Vec<u8>, u32> = TimeCache::new();
        cache.upsert(key(1), 1, Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(20));

        cache.upsert(key(1), 2, Duration::from_millis(10));
        assert_eq!(cache.sweep(), 0);
        assert_eq!(cache.get(&key(1)), Some(2));
    }

    #[test]
    fn test_remove_and_clear() {
        let cache: TimeCache<Vec<u8>> = TimeCache::new();
        cache.add(key(1), Duration::from_secs(60));
        cache.add(key(2), Duration::from_secs(60));

        cache.remove(&key(1));
        assert!(!cache.has(&key(1)));
        assert_eq!(cache.keys(), vec![key(2)]);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unbounded_span_never_expires() {
        let cache: TimeCache<Vec<u8>> = TimeCache::new();
        cache.add(key(1), Duration::MAX);
        cache.add(key(2), Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(cache.sweep(), 1);
        assert!(cache.has(&key(1)));
        assert_eq!(cache.remaining(&key(1)), Some(Duration::MAX));
    }

    #[test]
    fn test_concurrent_add_and_sweep() {
        use std::sync::Arc;

        let cache: Arc<TimeCache<u32>> = Arc::new(TimeCache::new());
        let mut handles = Vec::new();
        for t in 0..4u32 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for i in 0..250u32 {
                    cache.add(t * 1000 + i, Duration::from_secs(60));
                    if i % 50 == 0 {
                        cache.sweep();
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 1000);
    }
}
