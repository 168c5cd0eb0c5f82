//! Engine configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::{
    CACHE_DIR_NAME, CONFIG_ENV_VAR, CONFIG_FILE_NAME, DEFAULT_EXTENSION, DEFAULT_TEMPLATE_DIR,
    FALLBACK_CACHE_DIR,
};

/// Settings for an [`Environment`](crate::templating::Environment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory searched for top-level templates and as the fallback for
    /// `extends`/`include`.
    pub template_dir: PathBuf,

    /// Directory holding compiled programs.
    pub cache_dir: PathBuf,

    /// Extension tried when a template name does not resolve as written.
    pub extension: String,

    /// HTML-escape interpolations unless the filter chain contains `raw`.
    pub auto_escape: bool,

    /// Fail on undefined variables instead of rendering them as empty.
    pub strict_variables: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            template_dir: PathBuf::from(DEFAULT_TEMPLATE_DIR),
            cache_dir: Self::default_cache_dir(),
            extension: DEFAULT_EXTENSION.to_string(),
            auto_escape: true,
            strict_variables: false,
        }
    }
}

impl EngineConfig {
    /// Platform cache directory joined with `stencil`, or `.stencil-cache` when
    /// the platform has none.
    pub fn default_cache_dir() -> PathBuf {
        dirs::cache_dir()
            .map(|dir| dir.join(CACHE_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from(FALLBACK_CACHE_DIR))
    }

    /// Load configuration from `explicit`, `$STENCIL_CONFIG` or `./stencil.toml`,
    /// in that order, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the selected file cannot be read or parsed. An
    /// explicitly named file that does not exist is an error; an absent
    /// `./stencil.toml` is not.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).filter(|v| !v.is_empty()) {
            tracing::debug!("Using config from ${}", CONFIG_ENV_VAR);
            return Self::load_from(Path::new(&path));
        }

        let local = Path::new(CONFIG_FILE_NAME);
        if local.is_file() {
            return Self::load_from(local);
        }

        tracing::debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if config.template_dir.is_relative() {
                config.template_dir = base.join(&config.template_dir);
            }
            if config.cache_dir.is_relative() {
                config.cache_dir = base.join(&config.cache_dir);
            }
        }

        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    #[must_use]
    pub fn with_template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.template_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_strict_variables(mut self, strict: bool) -> Self {
        self.strict_variables = strict;
        self
    }

    #[must_use]
    pub fn with_auto_escape(mut self, auto_escape: bool) -> Self {
        self.auto_escape = auto_escape;
        self
    }
}
