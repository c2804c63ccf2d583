//! Filesystem existence checks.
//!
//! [`PathProbe`] is the only I/O the resolver performs. The default
//! [`TokioFsProbe`] asks `tokio::fs` for metadata; tests substitute scripted
//! probes that are slow, hang, fail or panic.
//!
//! A probe answers three ways:
//! - `Ok(true)`: the path exists
//! - `Ok(false)`: the path does not exist
//! - `Err(_)`: the check itself failed (permissions, I/O error, ...)

use std::io;
use std::path::Path;

use futures::future::BoxFuture;

/// Asynchronous existence check.
pub trait PathProbe: Send + Sync + 'static {
    /// Check whether `path` exists.
    fn exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<bool>>;
}

/// Probe backed by `tokio::fs::metadata`.
///
/// `NotFound` and `NotADirectory` (a path component is a regular file) map
/// to `Ok(false)`; every other error is surfaced.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFsProbe;

impl TokioFsProbe {
    /// Create a probe.
    pub fn new() -> Self {
        Self
    }
}

impl PathProbe for TokioFsProbe {
    fn exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<bool>> {
        Box::pin(async move {
            match tokio::fs::metadata(path).await {
                Ok(_) => Ok(true),
                Err(e) if is_absent(&e) => Ok(false),
                Err(e) => Err(e),
            }
        })
    }
}

fn is_absent(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}
