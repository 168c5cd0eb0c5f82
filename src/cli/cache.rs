//! `stencil cache`

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;

use super::CliConfig;
use crate::templating::TemplateCache;

/// Inspect or clear the compile cache.
#[derive(Args, Debug)]
pub struct CacheCommand {
    #[command(subcommand)]
    command: CacheSubcommand,
}

#[derive(Subcommand, Debug)]
enum CacheSubcommand {
    /// List cached templates
    List,
    /// Remove every cached template
    Clear,
}

impl CacheCommand {
    pub fn execute(self, config: &CliConfig, quiet: bool) -> Result<()> {
        let engine = config.engine_config()?;
        let cache = TemplateCache::new(&engine.cache_dir)?;

        match self.command {
            CacheSubcommand::List => {
                let entries = cache.entries()?;
                if entries.is_empty() {
                    if !quiet {
                        println!("No cached templates in {}", cache.dir().display());
                    }
                    return Ok(());
                }

                println!("{} ({})", "Cached templates".bold(), cache.dir().display());
                for (key, metadata) in entries {
                    let short = key.as_str().get(..12).unwrap_or(key.as_str());
                    println!(
                        "  {} {} {} dependencies, compiled {}",
                        short.dimmed(),
                        metadata.source.display(),
                        metadata.dependencies.len(),
                        metadata.compiled_at.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                }
            }
            CacheSubcommand::Clear => {
                let removed = cache.clear()?;
                if !quiet {
                    println!(
                        "{} Removed {} cached template(s) from {}",
                        "✓".green(),
                        removed,
                        cache.dir().display()
                    );
                }
            }
        }
        Ok(())
    }
}
