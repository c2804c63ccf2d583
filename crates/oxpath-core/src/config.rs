//! Resolver configuration.
//!
//! [`ResolverConfig`] is fixed when a [`PathResolver`] is built. A subset of
//! fields can be changed later through [`PathResolver::update_config`]; pool
//! sizing, the check deadline and cache geometry cannot.
//!
//! Configurations deserialize from TOML/JSON with human-readable durations:
//!
//! ```toml
//! base_path = "/srv/uploads"
//! cache_ttl = "30s"
//! worker_timeout = "5s"
//! traversal = "safe"
//! ```
//!
//! [`PathResolver`]: crate::PathResolver
//! [`PathResolver::update_config`]: crate::PathResolver::update_config

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default time-to-live for resolved paths.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Default ceiling on concurrently running resolutions.
pub const DEFAULT_MAX_CONCURRENT_CHECKS: usize = 100;

/// Default capacity of the admission queue.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 1000;

/// Default number of checks a single worker runs at once.
pub const DEFAULT_MAX_TASKS_PER_WORKER: usize = 10;

/// Default deadline for one existence check.
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of cache shards.
pub const DEFAULT_CACHE_SHARDS: usize = 16;

/// Default capacity of each cache shard.
pub const DEFAULT_SHARD_CAPACITY: usize = 512;

/// Default number of entries sampled per eviction.
pub const DEFAULT_EVICTION_SAMPLE_SIZE: usize = 5;

/// Default interval between background cleanup passes.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(10);

/// Bounds applied to the derived worker count.
pub const MIN_DERIVED_WORKERS: usize = 4;
/// Upper bound applied to the derived worker count.
pub const MAX_DERIVED_WORKERS: usize = 16;

/// How parent-directory segments in requested paths are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraversalPolicy {
    /// Strip `..` and `.` segments so requests cannot leave the base path.
    #[default]
    Safe,
    /// Keep `..` segments; only duplicate separators are collapsed.
    ///
    /// Requests can escape the base path in this mode.
    Allow,
}

/// Configuration for a [`PathResolver`](crate::PathResolver).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Directory that requested paths are resolved against.
    ///
    /// Made absolute (against the current directory) when the resolver is
    /// built. Default: the current directory.
    pub base_path: PathBuf,

    /// How long a resolved path is served from cache.
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// Maximum number of resolutions running at once.
    pub max_concurrent_checks: usize,

    /// Maximum number of resolutions waiting for admission.
    ///
    /// Requests beyond this fail with `Overloaded`.
    pub max_pending_requests: usize,

    /// Treatment of `..` segments.
    pub traversal: TraversalPolicy,

    /// Number of workers. `None` derives it from available parallelism,
    /// clamped to 4..=16.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_count: Option<usize>,

    /// Checks each worker runs concurrently.
    pub max_tasks_per_worker: usize,

    /// Deadline for a single existence check, queueing included.
    #[serde(with = "humantime_serde")]
    pub worker_timeout: Duration,

    /// Log failures other than `NotFound` at `warn` level.
    pub log_errors: bool,

    /// Route checks through the worker pool. When `false` (or when the pool
    /// cannot start) checks run inline on the caller's task.
    pub use_worker_pool: bool,

    /// Number of cache shards. Must be a power of two.
    pub cache_shards: usize,

    /// Maximum entries per cache shard.
    pub shard_capacity: usize,

    /// Entries sampled when choosing an eviction victim.
    pub eviction_sample_size: usize,

    /// Interval between background cleanup passes.
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            cache_ttl: DEFAULT_CACHE_TTL,
            max_concurrent_checks: DEFAULT_MAX_CONCURRENT_CHECKS,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            traversal: TraversalPolicy::Safe,
            worker_count: None,
            max_tasks_per_worker: DEFAULT_MAX_TASKS_PER_WORKER,
            worker_timeout: DEFAULT_WORKER_TIMEOUT,
            log_errors: true,
            use_worker_pool: true,
            cache_shards: DEFAULT_CACHE_SHARDS,
            shard_capacity: DEFAULT_SHARD_CAPACITY,
            eviction_sample_size: DEFAULT_EVICTION_SAMPLE_SIZE,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

impl ResolverConfig {
    /// Create a configuration rooted at `base_path` with default settings.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Self::default()
        }
    }

    /// Set the base path.
    #[must_use]
    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Set the cache TTL.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the concurrency ceiling and the admission queue capacity.
    #[must_use]
    pub fn with_admission_limits(mut self, max_concurrent: usize, max_pending: usize) -> Self {
        self.max_concurrent_checks = max_concurrent;
        self.max_pending_requests = max_pending;
        self
    }

    /// Set the traversal policy.
    #[must_use]
    pub fn with_traversal(mut self, traversal: TraversalPolicy) -> Self {
        self.traversal = traversal;
        self
    }

    /// Set an explicit worker count and per-worker task limit.
    #[must_use]
    pub fn with_workers(mut self, workers: usize, max_tasks_per_worker: usize) -> Self {
        self.worker_count = Some(workers);
        self.max_tasks_per_worker = max_tasks_per_worker;
        self
    }

    /// Set the per-check deadline.
    #[must_use]
    pub fn with_worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker_timeout = timeout;
        self
    }

    /// Enable or disable warn-level logging of failures.
    #[must_use]
    pub fn with_log_errors(mut self, enabled: bool) -> Self {
        self.log_errors = enabled;
        self
    }

    /// Enable or disable the worker pool.
    #[must_use]
    pub fn with_worker_pool(mut self, enabled: bool) -> Self {
        self.use_worker_pool = enabled;
        self
    }

    /// Set cache geometry: shard count (power of two) and per-shard capacity.
    #[must_use]
    pub fn with_cache_geometry(mut self, shards: usize, shard_capacity: usize) -> Self {
        self.cache_shards = shards;
        self.shard_capacity = shard_capacity;
        self
    }

    /// Set the background cleanup interval.
    #[must_use]
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// The worker count the pool will actually use.
    pub fn effective_worker_count(&self) -> usize {
        self.worker_count
            .unwrap_or_else(|| num_cpus::get().clamp(MIN_DERIVED_WORKERS, MAX_DERIVED_WORKERS))
    }

    /// Check every field for a usable value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("base_path", "must not be empty"));
        }
        if self.cache_ttl.is_zero() {
            return Err(ConfigError::invalid("cache_ttl", "must be greater than zero"));
        }
        if self.max_concurrent_checks == 0 {
            return Err(ConfigError::invalid(
                "max_concurrent_checks",
                "must be at least 1",
            ));
        }
        if self.worker_count == Some(0) {
            return Err(ConfigError::invalid("worker_count", "must be at least 1"));
        }
        if self.max_tasks_per_worker == 0 {
            return Err(ConfigError::invalid(
                "max_tasks_per_worker",
                "must be at least 1",
            ));
        }
        if self.worker_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "worker_timeout",
                "must be greater than zero",
            ));
        }
        if !self.cache_shards.is_power_of_two() {
            return Err(ConfigError::invalid(
                "cache_shards",
                format!("must be a power of two (got {})", self.cache_shards),
            ));
        }
        if self.shard_capacity == 0 {
            return Err(ConfigError::invalid("shard_capacity", "must be at least 1"));
        }
        if self.eviction_sample_size == 0 {
            return Err(ConfigError::invalid(
                "eviction_sample_size",
                "must be at least 1",
            ));
        }
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::invalid(
                "cleanup_interval",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Validate and make `base_path` absolute.
    pub(crate) fn into_resolved(mut self) -> Result<Self, ConfigError> {
        self.validate()?;
        self.base_path = absolute_base(&self.base_path)?;
        Ok(self)
    }

    /// Reject changes to fields that are fixed for the resolver's lifetime.
    pub(crate) fn check_mutable_fields(&self, next: &Self) -> Result<(), ConfigError> {
        let fixed: [(&'static str, bool); 8] = [
            ("worker_count", self.worker_count != next.worker_count),
            (
                "max_tasks_per_worker",
                self.max_tasks_per_worker != next.max_tasks_per_worker,
            ),
            ("use_worker_pool", self.use_worker_pool != next.use_worker_pool),
            ("cache_shards", self.cache_shards != next.cache_shards),
            ("shard_capacity", self.shard_capacity != next.shard_capacity),
            (
                "eviction_sample_size",
                self.eviction_sample_size != next.eviction_sample_size,
            ),
            ("cleanup_interval", self.cleanup_interval != next.cleanup_interval),
            ("worker_timeout", self.worker_timeout != next.worker_timeout),
        ];
        match fixed.iter().find(|(_, changed)| *changed) {
            Some(&(field, _)) => Err(ConfigError::Immutable { field }),
            None => Ok(()),
        }
    }
}

fn absolute_base(path: &Path) -> Result<PathBuf, ConfigError> {
    std::path::absolute(path).map_err(|source| ConfigError::BasePath {
        path: path.to_path_buf(),
        source,
    })
}
