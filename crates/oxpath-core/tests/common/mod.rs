//! Common test utilities for resolver integration tests.

#![allow(dead_code)]

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use oxpath_core::{PathProbe, PathResolver, ResolverConfig};

/// What a [`ScriptedProbe`] answers.
#[derive(Debug, Clone, Copy)]
pub enum Answer {
    /// `Ok(true)`
    Exists,
    /// `Ok(false)`
    Missing,
    /// `Err(kind)`
    Fail(io::ErrorKind),
    /// Never completes.
    Hang,
}

/// Probe with scripted latency and answers that records how it was used.
#[derive(Debug)]
pub struct ScriptedProbe {
    answer: Answer,
    delay: Duration,
    panic_prefix: Option<&'static str>,
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(answer: Answer) -> Self {
        Self {
            answer,
            delay: Duration::ZERO,
            panic_prefix: None,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn existing() -> Self {
        Self::new(Answer::Exists)
    }

    pub fn hanging() -> Self {
        Self::new(Answer::Hang)
    }

    pub fn failing(kind: io::ErrorKind) -> Self {
        Self::new(Answer::Fail(kind))
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Panic for any path whose file name starts with `prefix`.
    pub fn panicking_on(mut self, prefix: &'static str) -> Self {
        self.panic_prefix = Some(prefix);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most checks observed running at the same time.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl PathProbe for ScriptedProbe {
    fn exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<bool>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _running = RunningGuard::enter(&self.running, &self.peak);

            if let Some(prefix) = self.panic_prefix
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(prefix))
            {
                panic!("scripted probe panic for {}", path.display());
            }

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            match self.answer {
                Answer::Exists => Ok(true),
                Answer::Missing => Ok(false),
                Answer::Fail(kind) => Err(io::Error::from(kind)),
                Answer::Hang => {
                    std::future::pending::<()>().await;
                    Ok(true)
                }
            }
        })
    }
}

struct RunningGuard<'a> {
    running: &'a AtomicUsize,
}

impl<'a> RunningGuard<'a> {
    fn enter(running: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { running }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Configuration rooted at a fixed absolute base with test-friendly sizes.
pub fn test_config() -> ResolverConfig {
    ResolverConfig::new("/virtual/base").with_workers(2, 4)
}

/// Build a resolver on the current runtime with a scripted probe.
pub fn resolver_with(config: ResolverConfig, probe: &Arc<ScriptedProbe>) -> Arc<PathResolver> {
    PathResolver::new(config, Arc::clone(probe) as Arc<dyn PathProbe>)
        .expect("test configuration is valid")
}

/// Install a tracing subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
