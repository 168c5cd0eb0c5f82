//! `stencil compile`

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::CliConfig;

/// Compile a template through the cache and print the generated program.
#[derive(Args, Debug)]
pub struct CompileCommand {
    /// Template name, relative to the template directory
    name: String,

    /// Print only the generated code
    #[arg(long)]
    code_only: bool,
}

impl CompileCommand {
    pub fn execute(self, config: &CliConfig) -> Result<()> {
        let mut env = config.environment()?;
        let compiled = env.compile(&self.name)?;

        if self.code_only {
            println!("{}", compiled.code);
            return Ok(());
        }

        let cached = if env.stats().hits > 0 { "cached" } else { "compiled" };
        println!("{} {} ({})", "Template:".bold(), compiled.source.display(), cached);
        if compiled.dependencies.is_empty() {
            println!("{} none", "Dependencies:".bold());
        } else {
            println!("{}", "Dependencies:".bold());
            for dep in &compiled.dependencies {
                println!("  {}", dep.display());
            }
        }
        println!("{}", "Code:".bold());
        println!("{}", compiled.code);
        Ok(())
    }
}
