//! Optional process-wide resolver.
//!
//! Libraries should pass a [`PathResolver`] explicitly. Applications that
//! want a single shared instance can install one here once at startup.

use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::config::ResolverConfig;
use crate::error::ConfigError;
use crate::resolver::PathResolver;

static GLOBAL: OnceLock<Arc<PathResolver>> = OnceLock::new();

/// Install the process-wide resolver, or return the one already installed.
///
/// `config` is only used by the first successful call.
pub fn init_global(config: ResolverConfig) -> Result<Arc<PathResolver>, ConfigError> {
    if let Some(existing) = GLOBAL.get() {
        debug!("Global resolver already initialized, ignoring new configuration");
        return Ok(Arc::clone(existing));
    }
    let resolver = PathResolver::with_default_probe(config)?;
    // Losing a race leaves the other caller's resolver installed
    Ok(Arc::clone(GLOBAL.get_or_init(|| resolver)))
}

/// The process-wide resolver, if [`init_global`] has run.
pub fn global() -> Option<Arc<PathResolver>> {
    GLOBAL.get().map(Arc::clone)
}
