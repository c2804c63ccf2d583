#![deny(unsafe_code)]

mod commands;
mod config;
mod exit_code;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
#[cfg(feature = "tokio-console")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use oxpath_core::{ConfigError, ResolveError, ResolveErrorKind};

use crate::commands::{resolve, show_config};
use crate::config::Overrides;

/// Resolve paths against a base directory through a cached, bounded resolver
#[derive(Parser)]
#[command(name = "oxpath")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Check that files exist under a directory
    oxpath --base /srv/uploads resolve avatars/1.png reports/q3.pdf

    # Machine-readable output with resolver statistics
    oxpath --base . resolve --format json --stats src/main.rs

    # Show the effective configuration (from ~/.config/oxpath/config.toml)
    oxpath config
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file (TOML)
    #[arg(long, value_name = "FILE", env = "OXPATH_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve one or more paths
    Resolve(resolve::Args),

    /// Print the effective configuration
    Config(show_config::Args),
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            let code = categorize_error(&e);

            let args: Vec<String> = std::env::args().collect();
            let is_quiet = args.iter().any(|a| a == "-q" || a == "--quiet");

            if !is_quiet {
                eprintln!("Error: {e:#}");
            }

            ExitCode::from(code)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if !cli.quiet {
        setup_tracing(cli.verbose);
    }

    let source = config::locate(cli.config.as_deref());
    let file_config = config::load(&source)?;
    let effective = cli.overrides.apply(file_config)?;

    match cli.command {
        Commands::Resolve(args) => resolve::execute(&args, effective),
        Commands::Config(args) => show_config::execute(&args, &effective, &source),
    }
}

/// Set up tracing/logging based on verbosity level
fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    #[cfg(feature = "tokio-console")]
    {
        use tracing_subscriber::Layer;

        let fmt_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());
        tracing_subscriber::registry()
            .with(console_subscriber::spawn())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(io::stderr)
                    .with_filter(fmt_filter),
            )
            .init();
    }

    #[cfg(not(feature = "tokio-console"))]
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

/// Categorize an error into an exit code using typed error downcasting
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(resolve_err) = cause.downcast_ref::<ResolveError>() {
            return match resolve_err.kind() {
                ResolveErrorKind::NotFound => exit_code::NOT_FOUND,
                ResolveErrorKind::Overloaded
                | ResolveErrorKind::Timeout
                | ResolveErrorKind::ShuttingDown => exit_code::UNAVAILABLE,
                ResolveErrorKind::AccessError => exit_code::ACCESS_DENIED,
            };
        }

        if cause.downcast_ref::<ConfigError>().is_some() {
            return exit_code::GENERAL_ERROR;
        }

        if let Some(io_err) = cause.downcast_ref::<io::Error>()
            && io_err.kind() == io::ErrorKind::PermissionDenied
        {
            return exit_code::ACCESS_DENIED;
        }
    }

    exit_code::GENERAL_ERROR
}
