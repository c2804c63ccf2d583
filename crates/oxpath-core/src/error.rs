//! Error types for path resolution.
//!
//! Every failure a caller can observe from [`PathResolver::resolve`] is a
//! [`ResolveError`]. All variants are terminal: the resolver never retries
//! internally, and negative results are never cached.
//!
//! [`PathResolver::resolve`]: crate::PathResolver::resolve

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Errors returned by a resolution request.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The path does not exist (or the input was empty).
    #[error("path not found: {path}")]
    NotFound {
        /// The path as seen by the resolver (raw input or absolute target).
        path: String,
    },

    /// The existence check failed for a reason other than non-existence,
    /// or the worker running it crashed.
    #[error("access error for {}: {source}", path.display())]
    AccessError {
        /// Absolute path that was being checked.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The admission queue is full.
    #[error("resolver overloaded (queue capacity: {capacity})")]
    Overloaded {
        /// Configured pending queue capacity.
        capacity: usize,
    },

    /// The existence check did not complete before its deadline.
    #[error("existence check for {} timed out after {timeout:?}", path.display())]
    Timeout {
        /// Absolute path that was being checked.
        path: PathBuf,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The resolver is shutting down and no longer accepts work.
    #[error("resolver is shutting down")]
    ShuttingDown,
}

impl ResolveError {
    /// Create a `NotFound` error for the given path.
    pub fn not_found(path: impl Into<String>) -> Self {
        ResolveError::NotFound { path: path.into() }
    }

    /// Create an `AccessError` for a worker that went away mid-task.
    pub(crate) fn worker_lost(path: PathBuf) -> Self {
        ResolveError::AccessError {
            path,
            source: io::Error::other("worker terminated while the check was in flight"),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ResolveErrorKind {
        match self {
            ResolveError::NotFound { .. } => ResolveErrorKind::NotFound,
            ResolveError::AccessError { .. } => ResolveErrorKind::AccessError,
            ResolveError::Overloaded { .. } => ResolveErrorKind::Overloaded,
            ResolveError::Timeout { .. } => ResolveErrorKind::Timeout,
            ResolveError::ShuttingDown => ResolveErrorKind::ShuttingDown,
        }
    }

    /// Whether this is an expected outcome rather than a fault.
    ///
    /// `NotFound` is a normal answer to "does this exist?" and is never
    /// logged as an error.
    pub fn is_expected(&self) -> bool {
        matches!(self, ResolveError::NotFound { .. })
    }
}

/// Coarse classification of [`ResolveError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolveErrorKind {
    /// See [`ResolveError::NotFound`].
    NotFound,
    /// See [`ResolveError::AccessError`].
    AccessError,
    /// See [`ResolveError::Overloaded`].
    Overloaded,
    /// See [`ResolveError::Timeout`].
    Timeout,
    /// See [`ResolveError::ShuttingDown`].
    ShuttingDown,
}

impl fmt::Display for ResolveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResolveErrorKind::NotFound => "not_found",
            ResolveErrorKind::AccessError => "access_error",
            ResolveErrorKind::Overloaded => "overloaded",
            ResolveErrorKind::Timeout => "timeout",
            ResolveErrorKind::ShuttingDown => "shutting_down",
        };
        f.write_str(name)
    }
}

/// Errors from building or updating a [`ResolverConfig`].
///
/// [`ResolverConfig`]: crate::ResolverConfig
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A field has a value outside its allowed range.
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The base path could not be made absolute.
    #[error("cannot resolve base path {}: {source}", path.display())]
    BasePath {
        /// The configured base path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A field that is fixed at construction was changed by `update_config`.
    #[error("`{field}` cannot be changed on a running resolver")]
    Immutable {
        /// Name of the field.
        field: &'static str,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
