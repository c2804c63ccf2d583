//! Configuration file discovery and command-line overrides.
//!
//! Lookup order for the TOML file:
//! 1. `--config <FILE>` (or `OXPATH_CONFIG`)
//! 2. `$OXPATH_CONFIG_DIR/config.toml`
//! 3. the platform config directory, e.g. `~/.config/oxpath/config.toml`
//!
//! A missing file is only an error when it was named explicitly. Flags
//! override whatever the file sets.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use oxpath_core::{ResolverConfig, TraversalPolicy};
use serde::de::IntoDeserializer;
use serde::de::value::{Error as ValueError, StrDeserializer};

/// Where the configuration came from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Named with `--config`; must exist.
    Explicit(PathBuf),
    /// Discovered location; may not exist.
    Discovered(PathBuf),
    /// No config directory could be determined.
    Defaults,
}

impl ConfigSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::Explicit(path) | ConfigSource::Discovered(path) => Some(path),
            ConfigSource::Defaults => None,
        }
    }
}

/// Determine which config file applies.
pub fn locate(explicit: Option<&Path>) -> ConfigSource {
    if let Some(path) = explicit {
        return ConfigSource::Explicit(path.to_path_buf());
    }
    if let Some(dir) = std::env::var_os("OXPATH_CONFIG_DIR") {
        return ConfigSource::Discovered(PathBuf::from(dir).join("config.toml"));
    }
    directories::ProjectDirs::from("com", "oxpath", "oxpath").map_or(ConfigSource::Defaults, |dirs| {
        ConfigSource::Discovered(dirs.config_dir().join("config.toml"))
    })
}

/// Load the configuration from `source`, falling back to defaults.
pub fn load(source: &ConfigSource) -> Result<ResolverConfig> {
    let path = match source {
        ConfigSource::Explicit(path) => path,
        ConfigSource::Discovered(path) if path.exists() => path,
        ConfigSource::Discovered(_) | ConfigSource::Defaults => {
            return Ok(ResolverConfig::default());
        }
    };

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: ResolverConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    tracing::debug!(path = %path.display(), "Loaded configuration file");
    Ok(config)
}

/// Resolver settings that can be given on the command line.
#[derive(Args, Clone, Debug, Default)]
pub struct Overrides {
    /// Base directory paths are resolved against
    #[arg(long, value_name = "DIR", global = true)]
    pub base: Option<PathBuf>,

    /// Cache time-to-live (e.g. "30s", "2m")
    #[arg(long, value_name = "DURATION", value_parser = parse_duration, global = true)]
    pub ttl: Option<Duration>,

    /// Deadline for a single existence check (e.g. "500ms")
    #[arg(long, value_name = "DURATION", value_parser = parse_duration, global = true)]
    pub timeout: Option<Duration>,

    /// Maximum concurrent resolutions
    #[arg(long, value_name = "N", global = true)]
    pub max_concurrent: Option<usize>,

    /// Maximum resolutions waiting for admission
    #[arg(long, value_name = "N", global = true)]
    pub max_pending: Option<usize>,

    /// Number of pool workers
    #[arg(long, value_name = "N", global = true)]
    pub workers: Option<usize>,

    /// Keep ".." segments instead of stripping them
    #[arg(long, global = true)]
    pub allow_traversal: bool,

    /// Check paths inline instead of on the worker pool
    #[arg(long, global = true)]
    pub no_worker_pool: bool,
}

impl Overrides {
    /// Apply flags on top of `config` and validate the result.
    pub fn apply(&self, mut config: ResolverConfig) -> Result<ResolverConfig> {
        if let Some(base) = &self.base {
            config.base_path.clone_from(base);
        }
        if let Some(ttl) = self.ttl {
            config.cache_ttl = ttl;
        }
        if let Some(timeout) = self.timeout {
            config.worker_timeout = timeout;
        }
        if let Some(max_concurrent) = self.max_concurrent {
            config.max_concurrent_checks = max_concurrent;
        }
        if let Some(max_pending) = self.max_pending {
            config.max_pending_requests = max_pending;
        }
        if self.workers.is_some() {
            config.worker_count = self.workers;
        }
        if self.allow_traversal {
            config.traversal = TraversalPolicy::Allow;
        }
        if self.no_worker_pool {
            config.use_worker_pool = false;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

/// Parse a human-readable duration such as "250ms" or "1m 30s".
fn parse_duration(value: &str) -> Result<Duration, String> {
    let deserializer: StrDeserializer<'_, ValueError> = value.into_deserializer();
    humantime_serde::deserialize(deserializer).map_err(|e: ValueError| e.to_string())
}
