//! Command-line interface for stencil.
//!
//! # Commands
//!
//! - `render` - Render a template to stdout
//! - `compile` - Compile a template (through the cache) and print its program
//! - `cache` - List or clear the compile cache
//!
//! # Global options
//!
//! `--verbose`/`--quiet` control logging, `--config` selects a configuration
//! file, and `--template-dir`/`--cache-dir` override the configured directories.
//!
//! ```bash
//! stencil render page --var title=Hello --var 'items=[1,2,3]'
//! stencil --template-dir views render email/welcome --vars-file user.json
//! stencil compile page
//! stencil cache list
//! stencil cache clear
//! ```

mod cache;
mod compile;
mod render;


use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;
use crate::templating::Environment;

pub use cache::CacheCommand;
pub use compile::CompileCommand;
pub use render::RenderCommand;

/// Settings derived from the global flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliConfig {
    /// Log filter directive; `None` disables logging.
    pub log_level: Option<String>,
    pub config_path: Option<PathBuf>,
    pub template_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
}

impl CliConfig {
    /// Load the engine configuration and apply directory overrides.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = EngineConfig::load(self.config_path.as_deref())?;
        if let Some(dir) = &self.template_dir {
            config.template_dir = dir.clone();
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = dir.clone();
        }
        Ok(config)
    }

    /// Install the stderr tracing subscriber.
    ///
    /// `RUST_LOG` takes precedence over the default level but not over `--verbose`.
    pub fn init_logging(&self) {
        let Some(level) = &self.log_level else {
            return;
        };

        let filter = match std::env::var("RUST_LOG") {
            Ok(_) if level != "debug" => EnvFilter::from_default_env(),
            _ => EnvFilter::new(format!("stencil={level}")),
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }

    /// Build an [`Environment`] from this configuration.
    pub fn environment(&self) -> Result<Environment> {
        Ok(Environment::new(self.engine_config()?)?)
    }
}

/// Stencil - a caching template compiler
#[derive(Parser, Debug)]
#[command(name = "stencil", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file (default: $STENCIL_CONFIG or ./stencil.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory containing templates
    #[arg(long, global = true, value_name = "DIR")]
    template_dir: Option<PathBuf>,

    /// Directory for compiled templates
    #[arg(long, global = true, value_name = "DIR")]
    cache_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a template to stdout
    Render(RenderCommand),

    /// Compile a template and print the generated program
    Compile(CompileCommand),

    /// Manage the compile cache
    Cache(CacheCommand),
}

impl Cli {
    /// Execute the parsed command.
    pub fn execute(self) -> Result<()> {
        let config = self.build_config();
        config.init_logging();
        self.execute_with_config(&config)
    }

    /// Translate global flags into a [`CliConfig`].
    ///
    /// `--verbose` selects `debug`, `--quiet` disables logging, otherwise `warn`.
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            None
        } else {
            Some("warn".to_string())
        };

        CliConfig {
            log_level,
            config_path: self.config.clone(),
            template_dir: self.template_dir.clone(),
            cache_dir: self.cache_dir.clone(),
        }
    }

    /// Execute with an explicit configuration.
    pub fn execute_with_config(self, config: &CliConfig) -> Result<()> {
        match self.command {
            Commands::Render(cmd) => cmd.execute(config),
            Commands::Compile(cmd) => cmd.execute(config),
            Commands::Cache(cmd) => cmd.execute(config, self.quiet),
        }
    }
}
