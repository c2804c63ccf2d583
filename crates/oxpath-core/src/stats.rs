//! Statistics for the resolver and its components.
//!
//! Counters are lock-free atomics updated on the request path. Readers take
//! point-in-time snapshots ([`CacheStatsSnapshot`], [`ResolverStats`]) that
//! serialize with serde for diagnostics output.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Cumulative cache counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Lookups answered from a live entry.
    pub hits: AtomicU64,
    /// Lookups that found nothing or an expired entry.
    pub misses: AtomicU64,
    /// Entries removed by expiry or capacity eviction.
    pub evictions: AtomicU64,
}

impl CacheStats {
    /// Create new, zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cache hit.
    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache miss.
    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record evicted entries.
    #[inline]
    pub fn record_evictions(&self, count: u64) {
        if count > 0 {
            self.evictions.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Total hits.
    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Total misses.
    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Total evictions.
    pub fn eviction_count(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Hit rate as a fraction (0.0 to 1.0). Returns 0.0 with no lookups.
    pub fn hit_rate(&self) -> f64 {
        hit_rate(self.hit_count(), self.miss_count())
    }

    /// Snapshot the counters together with the current entry count.
    pub fn snapshot(&self, entries: u64, shards: usize) -> CacheStatsSnapshot {
        let hits = self.hit_count();
        let misses = self.miss_count();
        CacheStatsSnapshot {
            hits,
            misses,
            evictions: self.eviction_count(),
            entries,
            shards,
            hit_rate: hit_rate(hits, misses),
        }
    }
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    /// Lookups answered from cache.
    pub hits: u64,
    /// Lookups not answered from cache.
    pub misses: u64,
    /// Entries removed by expiry or eviction.
    pub evictions: u64,
    /// Entries currently held across all shards.
    pub entries: u64,
    /// Number of shards.
    pub shards: usize,
    /// `hits / (hits + misses)`, 0.0 when there were no lookups.
    pub hit_rate: f64,
}

impl CacheStatsSnapshot {
    /// Evictions per live entry; a rough indicator of cache pressure.
    pub fn eviction_ratio(&self) -> f64 {
        if self.entries == 0 {
            0.0
        } else {
            self.evictions as f64 / self.entries as f64
        }
    }
}

/// Point-in-time admission controller statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdmissionStatsSnapshot {
    /// Resolutions currently running.
    pub active: usize,
    /// Resolutions waiting for admission.
    pub queued: usize,
    /// Concurrency ceiling.
    pub max_concurrent: usize,
    /// Queue capacity.
    pub queue_capacity: usize,
    /// `active / max_concurrent` as a percentage.
    pub utilization_percent: f64,
    /// Requests refused with `Overloaded` since start.
    pub rejected: u64,
    /// Age of the oldest queued request in milliseconds (0 when empty).
    pub oldest_pending_age_ms: u64,
}

/// Point-in-time worker pool statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStatsSnapshot {
    /// Worker slots.
    pub workers: usize,
    /// Concurrent checks allowed per worker.
    pub max_tasks_per_worker: usize,
    /// In-flight checks per worker slot.
    pub in_flight_per_worker: Vec<usize>,
    /// Tasks waiting for a worker with spare capacity.
    pub pending: usize,
    /// Tasks submitted since start.
    pub submitted: u64,
    /// Tasks that produced a result (found or not found).
    pub completed: u64,
    /// Tasks that failed with an access error.
    pub failed: u64,
    /// Tasks abandoned at their deadline.
    pub timed_out: u64,
    /// Workers recreated after a crash.
    pub restarts: u64,
    /// Whether the pool has been terminated.
    pub terminated: bool,
}

impl PoolStatsSnapshot {
    /// Total in-flight checks across workers.
    pub fn in_flight(&self) -> usize {
        self.in_flight_per_worker.iter().sum()
    }
}

/// Aggregated resolver statistics, as returned by
/// [`PathResolver::stats`](crate::PathResolver::stats).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverStats {
    /// Cache counters.
    pub cache: CacheStatsSnapshot,
    /// Resolutions currently running.
    pub active_requests: usize,
    /// Resolutions waiting for admission.
    pub queued_requests: usize,
    /// Admission queue capacity.
    pub queue_capacity: usize,
    /// Concurrency utilization in percent.
    pub utilization_percent: f64,
    /// Requests rejected with `Overloaded`.
    pub rejected_count: u64,
    /// Age of the oldest queued request in milliseconds.
    pub oldest_pending_age_ms: u64,
    /// Worker pool statistics; `None` when running in direct mode.
    pub worker_pool: Option<PoolStatsSnapshot>,
    /// Checks executed inline because no pool was available.
    pub direct_checks: u64,
    /// Whether `shutdown()` has been called.
    pub shutting_down: bool,
}
