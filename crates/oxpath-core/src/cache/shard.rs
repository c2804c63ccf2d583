//! A single cache shard.
//!
//! Entries live in a `HashMap` for O(1) lookup. A parallel key vector gives
//! O(1) uniform sampling for eviction; each slot remembers its position in
//! that vector so removal is a `swap_remove` plus one index fix-up.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::random::uniform_index;

/// A cached resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Absolute path the key resolved to.
    pub resolved_path: PathBuf,
    /// Instant after which the entry is stale.
    pub expires_at: Instant,
}

impl CacheEntry {
    /// Whether the entry is stale at `now`.
    #[inline]
    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Outcome of a shard lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Live entry.
    Hit(PathBuf),
    /// Entry was present but stale; it has been removed.
    Expired,
    /// No entry for this key.
    Miss,
}

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    index: usize,
}

/// One partition of the cache key space with a fixed capacity.
#[derive(Debug)]
pub struct Shard {
    entries: HashMap<Arc<str>, Slot>,
    keys: Vec<Arc<str>>,
    capacity: usize,
    sample_size: usize,
}

impl Shard {
    /// Create an empty shard.
    pub fn new(capacity: usize, sample_size: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            keys: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
            sample_size: sample_size.max(1),
        }
    }

    /// Number of entries, live or stale.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the shard holds no entries.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up `key`, removing it if it has expired.
    pub fn get(&mut self, key: &str, now: Instant) -> Lookup {
        let Some(slot) = self.entries.get(key) else {
            return Lookup::Miss;
        };
        if slot.entry.is_expired(now) {
            let index = slot.index;
            self.remove_at(index);
            return Lookup::Expired;
        }
        Lookup::Hit(slot.entry.resolved_path.clone())
    }

    /// Peek at an entry without expiry handling.
    pub fn peek(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key).map(|slot| &slot.entry)
    }

    /// Insert or overwrite `key`.
    ///
    /// When the shard is full and `key` is new, one entry is evicted first.
    /// Returns the number of entries evicted (0 or 1).
    pub fn insert(&mut self, key: &str, entry: CacheEntry) -> u64 {
        if let Some(slot) = self.entries.get_mut(key) {
            slot.entry = entry;
            return 0;
        }

        let evicted = if self.keys.len() >= self.capacity {
            u64::from(self.evict_one())
        } else {
            0
        };

        let key: Arc<str> = Arc::from(key);
        self.keys.push(Arc::clone(&key));
        self.entries.insert(
            key,
            Slot {
                entry,
                index: self.keys.len() - 1,
            },
        );
        debug_assert!(self.keys.len() <= self.capacity);
        evicted
    }

    /// Remove `key`. Returns whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.entries.get(key) {
            Some(slot) => {
                let index = slot.index;
                self.remove_at(index);
                true
            }
            None => false,
        }
    }

    /// Remove every entry that is stale at `now`. Returns how many.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        // Walk backwards: remove_at swaps the tail into `i`, and the tail
        // has already been checked.
        for i in (0..self.keys.len()).rev() {
            let expired = self
                .entries
                .get(&self.keys[i])
                .is_some_and(|slot| slot.entry.is_expired(now));
            if expired {
                self.remove_at(i);
                removed += 1;
            }
        }
        removed
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.keys.clear();
    }

    /// Evict the entry closest to expiry among a random sample.
    ///
    /// Small shards are scanned in full. Returns whether an entry was removed.
    fn evict_one(&mut self) -> bool {
        let len = self.keys.len();
        if len == 0 {
            return false;
        }

        let victim = if len <= self.sample_size {
            (0..len).min_by_key(|&i| self.expires_at(i))
        } else {
            (0..self.sample_size)
                .map(|_| uniform_index(len))
                .min_by_key(|&i| self.expires_at(i))
        };

        match victim {
            Some(index) => {
                self.remove_at(index);
                true
            }
            None => false,
        }
    }

    fn expires_at(&self, index: usize) -> Option<Instant> {
        self.entries
            .get(&self.keys[index])
            .map(|slot| slot.entry.expires_at)
    }

    fn remove_at(&mut self, index: usize) {
        let key = self.keys.swap_remove(index);
        self.entries.remove(&key);
        if let Some(moved) = self.keys.get(index)
            && let Some(slot) = self.entries.get_mut(moved)
        {
            slot.index = index;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(path: &str, ttl: Duration) -> CacheEntry {
        CacheEntry {
            resolved_path: PathBuf::from(path),
            expires_at: Instant::now() + ttl,
        }
    }

    fn assert_consistent(shard: &Shard) {
        assert_eq!(shard.entries.len(), shard.keys.len());
        for (i, key) in shard.keys.iter().enumerate() {
            assert_eq!(shard.entries[key].index, i, "index mismatch for {key}");
        }
    }

    #[test]
    fn test_insert_and_get() {
        let mut shard = Shard::new(4, 2);
        shard.insert("a", entry("/base/a", Duration::from_secs(30)));

        assert_eq!(
            shard.get("a", Instant::now()),
            Lookup::Hit(PathBuf::from("/base/a"))
        );
        assert_eq!(shard.get("b", Instant::now()), Lookup::Miss);
    }

    #[test]
    fn test_expired_entry_is_removed_on_get() {
        let mut shard = Shard::new(4, 2);
        shard.insert("a", entry("/base/a", Duration::from_millis(10)));

        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(shard.get("a", later), Lookup::Expired);
        assert!(shard.is_empty());
        assert_eq!(shard.get("a", later), Lookup::Miss);
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let mut shard = Shard::new(2, 2);
        shard.insert("a", entry("/one", Duration::from_secs(30)));
        shard.insert("b", entry("/two", Duration::from_secs(30)));

        let evicted = shard.insert("a", entry("/three", Duration::from_secs(30)));
        assert_eq!(evicted, 0);
        assert_eq!(shard.len(), 2);
        assert_eq!(shard.peek("a").unwrap().resolved_path, PathBuf::from("/three"));
    }

    #[test]
    fn test_capacity_invariant_holds_after_every_insert() {
        let mut shard = Shard::new(512, 5);
        let mut evictions = 0;
        for i in 0..513 {
            evictions += shard.insert(&format!("key-{i}"), entry("/p", Duration::from_secs(30)));
            assert!(shard.len() <= shard.capacity());
        }
        assert_eq!(shard.len(), 512);
        assert_eq!(evictions, 1);
        assert_consistent(&shard);
    }

    #[test]
    fn test_small_shard_evicts_soonest_expiry() {
        let mut shard = Shard::new(3, 5);
        shard.insert("long", entry("/long", Duration::from_secs(300)));
        shard.insert("short", entry("/short", Duration::from_secs(1)));
        shard.insert("mid", entry("/mid", Duration::from_secs(60)));

        shard.insert("new", entry("/new", Duration::from_secs(60)));

        assert!(shard.peek("short").is_none());
        assert!(shard.peek("long").is_some());
        assert!(shard.peek("new").is_some());
        assert_consistent(&shard);
    }

    #[test]
    fn test_remove_keeps_indices_consistent() {
        let mut shard = Shard::new(8, 2);
        for key in ["a", "b", "c", "d"] {
            shard.insert(key, entry(key, Duration::from_secs(30)));
        }

        assert!(shard.remove("a"));
        assert!(!shard.remove("a"));
        assert_consistent(&shard);

        assert!(shard.remove("d"));
        assert_consistent(&shard);
        assert_eq!(shard.len(), 2);
    }

    #[test]
    fn test_purge_expired() {
        let mut shard = Shard::new(16, 4);
        for i in 0..6 {
            let ttl = if i % 2 == 0 {
                Duration::from_millis(1)
            } else {
                Duration::from_secs(60)
            };
            shard.insert(&format!("k{i}"), entry("/p", ttl));
        }

        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(shard.purge_expired(later), 3);
        assert_eq!(shard.len(), 3);
        assert_consistent(&shard);
    }
}
