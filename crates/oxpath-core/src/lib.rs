//! Concurrent path resolution with caching and backpressure.
//!
//! Resolves user-supplied relative paths against a base directory, checking
//! that each target exists. Results are cached, concurrent checks are
//! bounded, and overload is reported instead of queued without limit.
//!
//! # Components
//!
//! - [`PathResolver`] - Facade: normalize, consult cache, admit, check, cache
//! - [`ShardedCache`] - Lock-per-shard TTL cache with sampled eviction
//! - [`AdmissionController`] - Concurrency ceiling plus bounded priority queue
//! - [`WorkerPool`] - Supervised workers with per-check deadlines
//! - [`PathProbe`] - The existence check itself; [`TokioFsProbe`] by default
//! - [`random`] - Randomness used for sampling
//!
//! # Request flow
//!
//! ```text
//! resolve(path, priority)
//!   -> normalize -> cache hit? -> return
//!   -> admission (run now | queue | Overloaded)
//!   -> worker pool (or inline) existence check with deadline
//!   -> cache on success
//! ```
//!
//! # Errors
//!
//! Every failure is a [`ResolveError`]: `NotFound`, `AccessError`,
//! `Overloaded`, `Timeout` or `ShuttingDown`. Failures are never cached and
//! never retried internally.
//!
//! # Example
//!
//! ```no_run
//! use oxpath_core::{PathResolver, ResolverConfig, TraversalPolicy};
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ResolverConfig::new("/srv/uploads")
//!     .with_cache_ttl(Duration::from_secs(60))
//!     .with_admission_limits(64, 512)
//!     .with_traversal(TraversalPolicy::Safe);
//! let resolver = PathResolver::with_default_probe(config)?;
//!
//! match resolver.resolve("reports/2024.pdf", 10).await {
//!     Ok(path) => println!("found {}", path.display()),
//!     Err(e) => eprintln!("{} ({})", e, e.kind()),
//! }
//!
//! println!("hit rate: {:.2}", resolver.stats().cache.hit_rate);
//! resolver.shutdown();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod admission;
pub mod cache;
mod config;
mod error;
pub mod global;
pub mod normalize;
mod pool;
mod probe;
pub mod queue;
pub mod random;
mod resolver;
pub mod stats;

pub use admission::{AdmissionController, AdmissionPermit};
pub use cache::{CacheConfig, ShardedCache};
pub use config::{
    DEFAULT_CACHE_SHARDS, DEFAULT_CACHE_TTL, DEFAULT_CLEANUP_INTERVAL,
    DEFAULT_EVICTION_SAMPLE_SIZE, DEFAULT_MAX_CONCURRENT_CHECKS, DEFAULT_MAX_PENDING_REQUESTS,
    DEFAULT_MAX_TASKS_PER_WORKER, DEFAULT_SHARD_CAPACITY, DEFAULT_WORKER_TIMEOUT,
    MAX_DERIVED_WORKERS, MIN_DERIVED_WORKERS, ResolverConfig, TraversalPolicy,
};
pub use error::{ConfigError, ResolveError, ResolveErrorKind};
pub use pool::{PoolConfig, PoolError, WorkerPool};
pub use probe::{PathProbe, TokioFsProbe};
pub use queue::Priority;
pub use resolver::PathResolver;
pub use stats::{
    AdmissionStatsSnapshot, CacheStats, CacheStatsSnapshot, PoolStatsSnapshot, ResolverStats,
};
