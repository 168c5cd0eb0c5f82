//! Test utilities for stencil
//!
//! Helpers shared by unit tests and the integration test target (enabled there
//! through the `test-utils` feature):
//!
//! - [`init_test_logging`] installs a tracing subscriber once per process
//! - [`TemplateFixture`] is a temporary template directory and cache directory
//!   with helpers to write templates and control modification times
//!
//! # Example
//!
//! ```rust,no_run
//! use stencil::test_utils::TemplateFixture;
//! use serde_json::json;
//!
//! # fn example() -> anyhow::Result<()> {
//! let fixture = TemplateFixture::new()?;
//! fixture.write("page.html", "Hello {{ name }}")?;
//!
//! let mut env = fixture.environment()?;
//! assert_eq!(env.render("page", &json!({"name": "World"}))?, "Hello World");
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;
use crate::templating::Environment;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` if given, otherwise `RUST_LOG`. With neither set no subscriber
/// is installed.
///
/// ```bash
/// RUST_LOG=stencil=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}

/// A temporary `templates/` + `cache/` pair.
#[derive(Debug)]
pub struct TemplateFixture {
    temp: TempDir,
}

impl TemplateFixture {
    pub fn new() -> Result<Self> {
        init_test_logging(None);
        let temp = TempDir::new().context("Failed to create temp dir")?;
        fs::create_dir_all(temp.path().join("templates"))?;
        Ok(Self { temp })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn template_dir(&self) -> PathBuf {
        self.temp.path().join("templates")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.temp.path().join("cache")
    }

    /// Configuration pointing at this fixture's directories.
    pub fn config(&self) -> EngineConfig {
        EngineConfig::default().with_template_dir(self.template_dir()).with_cache_dir(self.cache_dir())
    }

    pub fn environment(&self) -> Result<Environment> {
        Ok(Environment::new(self.config())?)
    }

    /// Write a template relative to the template directory, creating parents.
    ///
    /// The file's modification time is set an hour in the past so a later
    /// [`update`](Self::update) is always observed as newer, even on filesystems
    /// with coarse timestamps.
    pub fn write(&self, name: &str, content: &str) -> Result<PathBuf> {
        let path = self.template_dir().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        self.set_modified(&path, SystemTime::now() - Duration::from_secs(3600))?;
        Ok(path)
    }

    /// Rewrite a template with the current time as its modification time.
    pub fn update(&self, name: &str, content: &str) -> Result<PathBuf> {
        let path = self.template_dir().join(name);
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        self.set_modified(&path, SystemTime::now())?;
        Ok(path)
    }

    pub fn set_modified(&self, path: &Path, time: SystemTime) -> Result<()> {
        let file = fs::OpenOptions::new()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.set_modified(time)
            .with_context(|| format!("Failed to set modification time of {}", path.display()))?;
        Ok(())
    }
}
