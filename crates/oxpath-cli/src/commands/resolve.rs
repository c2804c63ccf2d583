//! Resolve command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use comfy_table::{Cell, Color, Table, presets::UTF8_FULL_CONDENSED};
use futures::future::join_all;
use serde::Serialize;
use tracing::instrument;

use oxpath_core::{PathResolver, Priority, ResolveError, ResolverConfig, ResolverStats};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Paths to resolve, relative to the base directory
    #[arg(required = true, value_name = "PATH")]
    pub paths: Vec<String>,

    /// Priority of the requests (higher is admitted first)
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    pub priority: Priority,

    /// Resolve the whole batch this many times; later rounds hit the cache
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub repeat: u32,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Print resolver statistics afterwards
    #[arg(long)]
    pub stats: bool,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Serialize)]
struct Outcome {
    path: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolved: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct Report<'a> {
    results: &'a [Outcome],
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<&'a ResolverStats>,
}

#[instrument(level = "info", name = "cmd::resolve", skip_all)]
pub fn execute(args: &Args, config: ResolverConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(run(args, config))
}

async fn run(args: &Args, config: ResolverConfig) -> Result<()> {
    let resolver =
        PathResolver::with_default_probe(config).context("Invalid resolver configuration")?;

    let shared = &resolver;
    let priority = args.priority;
    let mut last_round = Vec::new();
    for round in 1..=args.repeat {
        last_round = join_all(args.paths.iter().map(|path| async move {
            (path.as_str(), shared.resolve(path, priority).await)
        }))
        .await;
        tracing::debug!(round, "Resolution round complete");
    }

    let stats = resolver.stats();
    resolver.shutdown();

    let outcomes: Vec<Outcome> = last_round.iter().map(|(path, result)| outcome(path, result)).collect();
    match args.format {
        OutputFormat::Json => {
            let report = Report {
                results: &outcomes,
                stats: args.stats.then_some(&stats),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Table => {
            print_outcomes(&outcomes);
            if args.stats {
                println!();
                print_stats(&stats);
            }
        }
    }

    let total = last_round.len();
    let mut failures = last_round.into_iter().filter_map(|(_, result)| result.err());
    match failures.next() {
        None => Ok(()),
        Some(first) => {
            let failed = 1 + failures.count();
            Err(anyhow::Error::new(first)
                .context(format!("{failed} of {total} path(s) could not be resolved")))
        }
    }
}

fn outcome(path: &str, result: &Result<PathBuf, ResolveError>) -> Outcome {
    match result {
        Ok(resolved) => Outcome {
            path: path.to_string(),
            status: "ok".to_string(),
            resolved: Some(resolved.clone()),
            error: None,
        },
        Err(e) => Outcome {
            path: path.to_string(),
            status: e.kind().to_string(),
            resolved: None,
            error: Some(e.to_string()),
        },
    }
}

fn print_outcomes(outcomes: &[Outcome]) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["Path", "Status", "Resolved"]);

    for outcome in outcomes {
        let status = Cell::new(&outcome.status).fg(if outcome.resolved.is_some() {
            Color::Green
        } else {
            Color::Red
        });
        let detail = match (&outcome.resolved, &outcome.error) {
            (Some(resolved), _) => resolved.display().to_string(),
            (None, Some(error)) => error.clone(),
            (None, None) => String::new(),
        };
        table.add_row(vec![Cell::new(&outcome.path), status, Cell::new(detail)]);
    }

    println!("{table}");
}

fn print_stats(stats: &ResolverStats) {
    println!(
        "  Cache: {:.1}% hit rate ({} hits / {} misses), {} entries, {} evictions",
        stats.cache.hit_rate * 100.0,
        stats.cache.hits,
        stats.cache.misses,
        stats.cache.entries,
        stats.cache.evictions
    );
    println!(
        "  Admission: {} active, {} queued (capacity {}), {} rejected",
        stats.active_requests, stats.queued_requests, stats.queue_capacity, stats.rejected_count
    );
    match &stats.worker_pool {
        Some(pool) => println!(
            "  Pool: {} workers, {} completed, {} failed, {} timed out, {} restarts",
            pool.workers, pool.completed, pool.failed, pool.timed_out, pool.restarts
        ),
        None => println!("  Pool: disabled ({} inline checks)", stats.direct_checks),
    }
}
