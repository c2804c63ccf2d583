//! Config command: print the effective configuration.

use anyhow::{Context, Result};
use clap::Args as ClapArgs;

use oxpath_core::ResolverConfig;

use crate::config::ConfigSource;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Print the config file location instead of its contents
    #[arg(long)]
    pub path: bool,
}

pub fn execute(args: &Args, config: &ResolverConfig, source: &ConfigSource) -> Result<()> {
    if args.path {
        match source.path() {
            Some(path) => println!("{}", path.display()),
            None => anyhow::bail!("No configuration directory available on this platform"),
        }
        return Ok(());
    }

    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
    print!("{rendered}");
    Ok(())
}
