//! `stencil render`

use anyhow::{Context, Result, bail};
use clap::Args;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::PathBuf;

use super::CliConfig;

/// Render a template with variables from the command line or a JSON file.
#[derive(Args, Debug)]
pub struct RenderCommand {
    /// Template name, relative to the template directory
    name: String,

    /// Set a variable; the value is parsed as JSON when possible, otherwise
    /// taken as a string (repeatable)
    #[arg(long = "var", value_name = "KEY=VALUE")]
    vars: Vec<String>,

    /// Read variables from a JSON object file; `--var` entries take precedence
    #[arg(long, value_name = "FILE")]
    vars_file: Option<PathBuf>,

    /// Fail on undefined variables
    #[arg(long)]
    strict: bool,
}

/// Parse `KEY=VALUE`. Values that are valid JSON keep their type.
pub(crate) fn parse_var(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("Invalid --var '{raw}': expected KEY=VALUE");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("Invalid --var '{raw}': empty key");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

impl RenderCommand {
    pub(super) fn variables(&self) -> Result<Value> {
        let mut vars = match &self.vars_file {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read variables from {}", path.display()))?;
                match serde_json::from_str::<Value>(&content)
                    .with_context(|| format!("Failed to parse variables from {}", path.display()))?
                {
                    Value::Object(map) => map,
                    _ => bail!("Variables file {} must contain a JSON object", path.display()),
                }
            }
            None => Map::new(),
        };

        for raw in &self.vars {
            let (key, value) = parse_var(raw)?;
            vars.insert(key, value);
        }
        Ok(Value::Object(vars))
    }

    pub fn execute(self, config: &CliConfig) -> Result<()> {
        let vars = self.variables()?;
        let mut engine = config.engine_config()?;
        if self.strict {
            engine.strict_variables = true;
        }

        let mut env = crate::templating::Environment::new(engine)?;
        let output = env.render(&self.name, &vars)?;
        tracing::debug!("Render stats: {:?}", env.stats());

        let mut stdout = std::io::stdout().lock();
        stdout.write_all(output.as_bytes()).context("Failed to write output")?;
        stdout.flush()?;
        Ok(())
    }
}
