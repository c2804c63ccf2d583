//! Sharded TTL cache for resolved paths.
//!
//! The key space is split across a power-of-two number of shards, each
//! guarded by its own `parking_lot::Mutex`. A lookup or insert locks exactly
//! one shard, so unrelated keys rarely contend.
//!
//! # Expiry
//!
//! Entries carry an absolute expiry instant. Stale entries are removed when a
//! lookup finds them, and by a background task that periodically visits a
//! random subset of shards (see [`ShardedCache::start_cleanup`]). Each
//! removal of a stale entry counts as an eviction.
//!
//! # Eviction
//!
//! A full shard evicts one entry before accepting a new key. The victim is
//! the entry closest to expiry among a small random sample, which keeps the
//! cost at O(sample) instead of a full scan.

mod shard;

pub use shard::{CacheEntry, Lookup, Shard};

use std::hash::{BuildHasher, RandomState};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::config::{DEFAULT_CACHE_SHARDS, DEFAULT_EVICTION_SAMPLE_SIZE, DEFAULT_SHARD_CAPACITY};
use crate::random::distinct_indices;
use crate::stats::{CacheStats, CacheStatsSnapshot};

/// Far-future fallback when `now + ttl` overflows.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Cache geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Number of shards (power of two).
    pub shards: usize,
    /// Maximum entries per shard.
    pub shard_capacity: usize,
    /// Entries sampled per eviction.
    pub sample_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shards: DEFAULT_CACHE_SHARDS,
            shard_capacity: DEFAULT_SHARD_CAPACITY,
            sample_size: DEFAULT_EVICTION_SAMPLE_SIZE,
        }
    }
}

/// Concurrent, sharded map from normalized path keys to resolved paths.
pub struct ShardedCache {
    shards: Box<[Mutex<Shard>]>,
    mask: usize,
    hasher: RandomState,
    stats: CacheStats,
    cleanup: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl std::fmt::Debug for ShardedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedCache")
            .field("shards", &self.shards.len())
            .field("entries", &self.len())
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ShardedCache {
    /// Create a cache with the given geometry.
    ///
    /// A shard count that is not a power of two is rounded up to one.
    pub fn new(config: CacheConfig) -> Self {
        let count = config.shards.max(1).next_power_of_two();
        let shards = (0..count)
            .map(|_| Mutex::new(Shard::new(config.shard_capacity, config.sample_size)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shards,
            mask: count - 1,
            hasher: RandomState::new(),
            stats: CacheStats::new(),
            cleanup: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    /// Index of the shard that owns `key`.
    ///
    /// Stable for the lifetime of this cache.
    #[inline]
    pub fn shard_index(&self, key: &str) -> usize {
        // Truncation is fine: only the low bits select the shard
        #[allow(clippy::cast_possible_truncation)]
        let hash = self.hasher.hash_one(key) as usize;
        hash & self.mask
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Look up `key`.
    ///
    /// A stale entry is removed and reported as a miss (and an eviction).
    pub fn get(&self, key: &str) -> Option<PathBuf> {
        let lookup = self.shards[self.shard_index(key)]
            .lock()
            .get(key, Instant::now());

        match lookup {
            Lookup::Hit(path) => {
                self.stats.record_hit();
                Some(path)
            }
            Lookup::Expired => {
                trace!(key, "Cache entry expired");
                self.stats.record_evictions(1);
                self.stats.record_miss();
                None
            }
            Lookup::Miss => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Insert or overwrite `key`, expiring after `ttl`.
    pub fn set(&self, key: &str, resolved_path: PathBuf, ttl: Duration) {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + MAX_TTL.min(ttl));
        let entry = CacheEntry {
            resolved_path,
            expires_at,
        };

        let evicted = self.shards[self.shard_index(key)].lock().insert(key, entry);
        if evicted > 0 {
            debug!(key, "Shard at capacity, evicted one entry");
            self.stats.record_evictions(evicted);
        }
    }

    /// Remove `key`. Returns whether an entry was present.
    pub fn remove(&self, key: &str) -> bool {
        self.shards[self.shard_index(key)].lock().remove(key)
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    /// Total entries across shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    /// Whether every shard is empty.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.lock().is_empty())
    }

    /// Entries held by one shard.
    pub fn shard_len(&self, index: usize) -> usize {
        self.shards[index & self.mask].lock().len()
    }

    /// Number of shards one cleanup pass visits.
    pub fn shards_per_cleanup(&self) -> usize {
        (self.shards.len() / 4).max(1)
    }

    /// Remove stale entries from a random subset of shards.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired_sample(&self) -> usize {
        let now = Instant::now();
        let removed: usize = distinct_indices(self.shards.len(), self.shards_per_cleanup())
            .into_iter()
            .map(|index| self.shards[index].lock().purge_expired(now))
            .sum();

        if removed > 0 {
            self.stats.record_evictions(removed as u64);
            debug!(removed, "Cleanup pass removed expired entries");
        }
        removed
    }

    /// Remove stale entries from every shard.
    pub fn purge_expired_all(&self) -> usize {
        let now = Instant::now();
        let removed: usize = self
            .shards
            .iter()
            .map(|shard| shard.lock().purge_expired(now))
            .sum();
        self.stats.record_evictions(removed as u64);
        removed
    }

    /// Start the periodic cleanup task on the current tokio runtime.
    ///
    /// The task holds only a weak reference and stops when the cache is
    /// dropped or disposed. Returns `false` when no runtime is available or
    /// cleanup is already running.
    pub fn start_cleanup(self: &Arc<Self>, interval: Duration) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No tokio runtime, cache cleanup disabled");
            return false;
        };

        let mut slot = self.cleanup.lock();
        if slot.is_some() || self.is_disposed() {
            return false;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        *slot = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else { break };
                if cache.is_disposed() {
                    break;
                }
                cache.purge_expired_sample();
            }
            trace!("Cache cleanup task exiting");
        }));
        true
    }

    /// Stop background cleanup and drop all entries. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.cleanup.lock().take() {
            handle.abort();
        }
        self.clear();
        debug!("Cache disposed");
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Raw counters.
    pub fn counters(&self) -> &CacheStats {
        &self.stats
    }

    /// Snapshot of counters and current size.
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot(self.len() as u64, self.shards.len())
    }
}

impl Default for ShardedCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl Drop for ShardedCache {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn geometry(shards: usize, shard_capacity: usize) -> CacheConfig {
        CacheConfig {
            shards,
            shard_capacity,
            sample_size: 5,
        }
    }

    #[test]
    fn test_set_then_get_before_ttl() {
        let cache = ShardedCache::default();
        cache.set("docs/a.txt", PathBuf::from("/srv/docs/a.txt"), Duration::from_secs(30));

        assert_eq!(cache.get("docs/a.txt"), Some(PathBuf::from("/srv/docs/a.txt")));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_get_after_ttl_is_absent_and_counts_eviction() {
        let cache = ShardedCache::default();
        cache.set("a", PathBuf::from("/a"), Duration::from_millis(20));
        thread::sleep(Duration::from_millis(40));

        assert_eq!(cache.get("a"), None);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn test_shard_count_rounds_up_to_power_of_two() {
        let cache = ShardedCache::new(geometry(12, 8));
        assert_eq!(cache.shard_count(), 16);
        for key in ["a", "b", "some/long/path"] {
            assert!(cache.shard_index(key) < 16);
            assert_eq!(cache.shard_index(key), cache.shard_index(key));
        }
    }

    #[test]
    fn test_513_keys_into_one_shard() {
        let cache = ShardedCache::new(geometry(4, 512));
        let target = 0;
        let mut inserted = 0;
        let mut n = 0;
        while inserted < 513 {
            let key = format!("file-{n}");
            n += 1;
            if cache.shard_index(&key) != target {
                continue;
            }
            cache.set(&key, PathBuf::from(&key), Duration::from_secs(30));
            inserted += 1;
        }

        assert_eq!(cache.shard_len(target), 512);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = ShardedCache::default();
        cache.set("a", PathBuf::from("/a"), Duration::from_secs(30));
        cache.set("b", PathBuf::from("/b"), Duration::from_secs(30));

        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_purge_expired_all() {
        let cache = ShardedCache::new(geometry(8, 64));
        for i in 0..20 {
            cache.set(&format!("short-{i}"), PathBuf::from("/s"), Duration::from_millis(10));
        }
        cache.set("long", PathBuf::from("/l"), Duration::from_secs(60));
        thread::sleep(Duration::from_millis(30));

        assert_eq!(cache.purge_expired_all(), 20);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 20);
    }

    #[test]
    fn test_purge_sample_visits_subset() {
        let cache = ShardedCache::new(geometry(16, 64));
        assert_eq!(cache.shards_per_cleanup(), 4);

        for i in 0..200 {
            cache.set(&format!("k{i}"), PathBuf::from("/p"), Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(20));

        let removed = cache.purge_expired_sample();
        assert!(removed < 200, "a sampled pass must not visit every shard");
        assert_eq!(cache.len(), 200 - removed);
    }

    #[test]
    fn test_concurrent_set_and_get() {
        let cache = Arc::new(ShardedCache::new(geometry(8, 128)));
        let mut handles = Vec::new();

        for t in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                for i in 0..500 {
                    let key = format!("t{t}-k{}", i % 50);
                    cache.set(&key, PathBuf::from(&key), Duration::from_secs(30));
                    assert_eq!(cache.get(&key), Some(PathBuf::from(&key)));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 8 * 50);
        assert_eq!(cache.stats().hits, 8 * 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_cleanup_runs_and_stops_on_dispose() {
        let cache = Arc::new(ShardedCache::new(geometry(1, 64)));
        cache.set("a", PathBuf::from("/a"), Duration::from_millis(1));
        assert!(cache.start_cleanup(Duration::from_millis(100)));
        assert!(!cache.start_cleanup(Duration::from_millis(100)));

        // Entry expiry uses wall-clock time; give it a moment to lapse
        std::thread::sleep(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(cache.is_empty());
        assert_eq!(cache.stats().evictions, 1);

        cache.dispose();
        assert!(cache.is_disposed());
        assert!(!cache.start_cleanup(Duration::from_millis(100)));
    }

    #[test]
    fn test_start_cleanup_without_runtime() {
        let cache = Arc::new(ShardedCache::default());
        assert!(!cache.start_cleanup(Duration::from_secs(1)));
    }
}
