//! Path resolution facade.
//!
//! [`PathResolver`] ties the components together. A request moves through:
//!
//! 1. normalization into a cache key
//! 2. cache lookup (a hit returns immediately)
//! 3. admission (may wait in the priority queue or fail with `Overloaded`)
//! 4. an existence check on the worker pool, or inline when no pool runs
//! 5. on success, the cache is populated; failures are never cached
//!
//! # Example
//!
//! ```no_run
//! use oxpath_core::{PathResolver, ResolverConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = PathResolver::with_default_probe(ResolverConfig::new("/srv/uploads"))?;
//! let path = resolver.resolve("avatars/1.png", 0).await?;
//! println!("{}", path.display());
//! resolver.shutdown();
//! # Ok(())
//! # }
//! ```

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, info, trace, warn};

use crate::admission::AdmissionController;
use crate::cache::{CacheConfig, ShardedCache};
use crate::config::ResolverConfig;
use crate::error::{ConfigError, ResolveError};
use crate::normalize::{normalize, target_path};
use crate::pool::{PoolConfig, WorkerPool};
use crate::probe::{PathProbe, TokioFsProbe};
use crate::queue::Priority;
use crate::stats::ResolverStats;

/// Concurrent, cached path resolver.
pub struct PathResolver {
    config: RwLock<Arc<ResolverConfig>>,
    /// Bumped under the config write lock whenever cached keys stop meaning
    /// what they meant, so in-flight resolutions do not repopulate them.
    generation: AtomicU64,
    cache: Arc<ShardedCache>,
    admission: Arc<AdmissionController>,
    pool: Option<WorkerPool>,
    probe: Arc<dyn PathProbe>,
    direct_checks: AtomicU64,
    shutting_down: AtomicBool,
}

impl std::fmt::Debug for PathResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathResolver")
            .field("base_path", &self.config.read().base_path)
            .field("cache", &self.cache)
            .field("admission", &self.admission)
            .field("pool", &self.pool)
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

impl PathResolver {
    /// Build a resolver that checks paths with `probe`.
    ///
    /// The worker pool and cache cleanup start on the current tokio runtime.
    /// Without one (or with `use_worker_pool = false`) checks run inline on
    /// the calling task and expired entries are only dropped on lookup.
    pub fn new(config: ResolverConfig, probe: Arc<dyn PathProbe>) -> Result<Arc<Self>, ConfigError> {
        let config = config.into_resolved()?;

        let cache = Arc::new(ShardedCache::new(CacheConfig {
            shards: config.cache_shards,
            shard_capacity: config.shard_capacity,
            sample_size: config.eviction_sample_size,
        }));
        cache.start_cleanup(config.cleanup_interval);

        let admission =
            AdmissionController::new(config.max_concurrent_checks, config.max_pending_requests);

        let pool = if config.use_worker_pool {
            match WorkerPool::start(PoolConfig::from_resolver(&config), Arc::clone(&probe)) {
                Ok(pool) => Some(pool),
                Err(e) => {
                    warn!(error = %e, "Worker pool unavailable, checking paths inline");
                    None
                }
            }
        } else {
            debug!("Worker pool disabled, checking paths inline");
            None
        };

        info!(
            base_path = %config.base_path.display(),
            traversal = ?config.traversal,
            cache_ttl_ms = config.cache_ttl.as_millis(),
            pooled = pool.is_some(),
            "Path resolver ready"
        );

        Ok(Arc::new(Self {
            config: RwLock::new(Arc::new(config)),
            generation: AtomicU64::new(0),
            cache,
            admission,
            pool,
            probe,
            direct_checks: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
        }))
    }

    /// Build a resolver backed by [`TokioFsProbe`].
    pub fn with_default_probe(config: ResolverConfig) -> Result<Arc<Self>, ConfigError> {
        Self::new(config, Arc::new(TokioFsProbe::new()))
    }

    /// Current configuration.
    pub fn config(&self) -> Arc<ResolverConfig> {
        Arc::clone(&self.config.read())
    }

    /// Resolve `path` against the base path.
    ///
    /// Higher `priority` values are admitted first when the resolver is
    /// saturated. Returns the absolute path when it exists.
    pub async fn resolve(&self, path: &str, priority: Priority) -> Result<PathBuf, ResolveError> {
        let (config, generation) = {
            let current = self.config.read();
            (Arc::clone(&current), self.generation.load(Ordering::Acquire))
        };
        let result = self.resolve_with(&config, generation, path, priority).await;
        if let Err(e) = &result {
            log_failure(path, e, config.log_errors);
        }
        result
    }

    async fn resolve_with(
        &self,
        config: &ResolverConfig,
        generation: u64,
        path: &str,
        priority: Priority,
    ) -> Result<PathBuf, ResolveError> {
        if self.is_shutting_down() {
            return Err(ResolveError::ShuttingDown);
        }
        if path.is_empty() {
            return Err(ResolveError::not_found(path));
        }
        let Some(key) = normalize(path, config.traversal) else {
            return Err(ResolveError::not_found(path));
        };

        if let Some(hit) = self.cache.get(&key) {
            trace!(key = %key, "Cache hit");
            return Ok(hit);
        }

        let _permit = self.admission.acquire(priority).await?;
        let target = target_path(&config.base_path, &key);
        let resolved = match &self.pool {
            Some(pool) => pool.check_path(target, priority).await?,
            None => self.check_inline(target, config.worker_timeout).await?,
        };

        self.populate(&key, resolved.clone(), config.cache_ttl, generation);
        Ok(resolved)
    }

    /// Cache a successful resolution unless the resolver is shutting down or
    /// the configuration it was resolved under has been replaced.
    fn populate(&self, key: &str, resolved: PathBuf, ttl: Duration, generation: u64) {
        // Held so update_config cannot bump the generation between the check
        // and the insert.
        let _config = self.config.read();
        if self.is_shutting_down() {
            return;
        }
        if self.generation.load(Ordering::Acquire) != generation {
            debug!(key, "Configuration changed during resolution, not caching");
            return;
        }
        self.cache.set(key, resolved, ttl);
    }

    /// Existence check on the calling task, with the same deadline and
    /// outcomes as the pool. A panicking probe fails the request with
    /// `AccessError`, as a crashed worker would.
    async fn check_inline(&self, target: PathBuf, timeout: Duration) -> Result<PathBuf, ResolveError> {
        self.direct_checks.fetch_add(1, Ordering::Relaxed);
        let check = AssertUnwindSafe(self.probe.exists(&target)).catch_unwind();
        let outcome = tokio::time::timeout(timeout, check).await;
        match outcome {
            Ok(Ok(Ok(true))) => Ok(target),
            Ok(Ok(Ok(false))) => Err(ResolveError::not_found(target.display().to_string())),
            Ok(Ok(Err(source))) => Err(ResolveError::AccessError {
                path: target,
                source,
            }),
            Ok(Err(_panic)) => {
                warn!(path = %target.display(), "Inline existence check panicked");
                Err(ResolveError::worker_lost(target))
            }
            Err(_elapsed) => Err(ResolveError::Timeout {
                path: target,
                timeout,
            }),
        }
    }

    /// Drop the cached entry for `path`, if any.
    pub fn invalidate(&self, path: &str) -> bool {
        let traversal = self.config.read().traversal;
        normalize(path, traversal).is_some_and(|key| self.cache.remove(&key))
    }

    /// Drop every cached entry.
    pub fn clear_cache(&self) {
        self.cache.clear();
        debug!("Resolver cache cleared");
    }

    /// Apply a configuration change.
    ///
    /// Base path, TTL, traversal policy, error logging and admission limits
    /// take effect for subsequent requests. Changing the base path or the
    /// traversal policy clears the cache. Pool sizing, the check deadline and
    /// cache geometry are fixed; changing them fails with
    /// [`ConfigError::Immutable`] and leaves the configuration untouched.
    pub fn update_config(&self, update: impl FnOnce(&mut ResolverConfig)) -> Result<(), ConfigError> {
        let mut current = self.config.write();
        let mut next = ResolverConfig::clone(&current);
        update(&mut next);
        let next = next.into_resolved()?;
        current.check_mutable_fields(&next)?;

        let invalidate =
            current.base_path != next.base_path || current.traversal != next.traversal;
        self.admission
            .set_limits(next.max_concurrent_checks, next.max_pending_requests);
        if invalidate {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
        *current = Arc::new(next);
        drop(current);

        if invalidate {
            self.cache.clear();
        }
        info!(cache_cleared = invalidate, "Resolver configuration updated");
        Ok(())
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> ResolverStats {
        let admission = self.admission.stats();
        ResolverStats {
            cache: self.cache.stats(),
            active_requests: admission.active,
            queued_requests: admission.queued,
            queue_capacity: admission.queue_capacity,
            utilization_percent: admission.utilization_percent,
            rejected_count: admission.rejected,
            oldest_pending_age_ms: admission.oldest_pending_age_ms,
            worker_pool: self.pool.as_ref().map(WorkerPool::stats),
            direct_checks: self.direct_checks.load(Ordering::Relaxed),
            shutting_down: self.is_shutting_down(),
        }
    }

    /// Stop accepting work and release resources. Idempotent.
    ///
    /// Requests waiting for admission fail with `ShuttingDown`, as do checks
    /// in flight on the pool. Cached entries are dropped.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let rejected = self.admission.close();
        if let Some(pool) = &self.pool {
            pool.terminate();
        }
        self.cache.dispose();
        info!(rejected_queued = rejected, "Path resolver shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }
}

fn log_failure(path: &str, error: &ResolveError, log_errors: bool) {
    let quiet = error.is_expected() || matches!(error, ResolveError::ShuttingDown);
    if log_errors && !quiet {
        warn!(path, kind = %error.kind(), "Resolution failed: {error}");
    } else {
        debug!(path, kind = %error.kind(), "Resolution failed: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TraversalPolicy;
    use tempfile::TempDir;

    fn resolver_in(dir: &TempDir, pooled: bool) -> Arc<PathResolver> {
        let config = ResolverConfig::new(dir.path()).with_worker_pool(pooled);
        PathResolver::with_default_probe(config).unwrap()
    }

    #[tokio::test]
    async fn test_resolves_existing_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        let resolver = resolver_in(&dir, true);

        let resolved = resolver.resolve("a.txt", 0).await.unwrap();
        assert_eq!(resolved, dir.path().join("a.txt"));
        assert_eq!(resolver.stats().cache.entries, 1);
    }

    #[tokio::test]
    async fn test_empty_input_is_not_found() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver_in(&dir, false);

        assert!(matches!(
            resolver.resolve("", 0).await,
            Err(ResolveError::NotFound { .. })
        ));
        assert!(matches!(
            resolver.resolve("/../", 0).await,
            Err(ResolveError::NotFound { .. })
        ));
        assert_eq!(resolver.stats().direct_checks, 0);
    }

    #[tokio::test]
    async fn test_equivalent_spellings_share_an_entry() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/f"), b"x").unwrap();
        let resolver = resolver_in(&dir, false);

        resolver.resolve("sub/f", 0).await.unwrap();
        resolver.resolve("//sub//f", 0).await.unwrap();
        resolver.resolve("../sub/./f", 0).await.unwrap();

        let stats = resolver.stats();
        assert_eq!(stats.direct_checks, 1);
        assert_eq!(stats.cache.hits, 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_recheck() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        let resolver = resolver_in(&dir, false);

        resolver.resolve("f", 0).await.unwrap();
        assert!(resolver.invalidate("/f"));
        assert!(!resolver.invalidate("f"));

        std::fs::remove_file(dir.path().join("f")).unwrap();
        assert!(matches!(
            resolver.resolve("f", 0).await,
            Err(ResolveError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_config_applies_and_clears() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        let resolver = resolver_in(&dir, false);
        resolver.resolve("f", 0).await.unwrap();

        resolver
            .update_config(|c| {
                c.traversal = TraversalPolicy::Allow;
                c.cache_ttl = Duration::from_secs(1);
            })
            .unwrap();
        assert_eq!(resolver.config().traversal, TraversalPolicy::Allow);
        assert_eq!(resolver.stats().cache.entries, 0);

        resolver.update_config(|c| c.log_errors = false).unwrap();
        resolver.resolve("f", 0).await.unwrap();
        assert_eq!(resolver.stats().cache.entries, 1);
    }

    #[tokio::test]
    async fn test_update_config_rejects_fixed_fields() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver_in(&dir, false);

        let result = resolver.update_config(|c| c.cache_shards = 64);
        assert!(matches!(
            result,
            Err(ConfigError::Immutable {
                field: "cache_shards"
            })
        ));
        assert_eq!(resolver.config().cache_shards, 16);

        let result = resolver.update_config(|c| c.cache_ttl = Duration::ZERO);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[tokio::test]
    async fn test_update_config_admission_limits() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver_in(&dir, false);

        resolver
            .update_config(|c| {
                c.max_concurrent_checks = 7;
                c.max_pending_requests = 3;
            })
            .unwrap();
        assert_eq!(resolver.stats().queue_capacity, 3);
    }

    #[test]
    fn test_builds_without_runtime() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver_in(&dir, true);
        let stats = resolver.stats();
        assert!(stats.worker_pool.is_none());
        assert!(!stats.shutting_down);
    }
}
