//! Stencil - a caching template compiler
//!
//! Stencil compiles a small template-authoring syntax (conditionals, loops,
//! interpolation with filter chains, block inheritance and file inclusion) into a
//! serializable rendering program, and caches compiled programs on disk keyed on
//! the modification times of the template and every file it depends on.
//!
//! # Architecture Overview
//!
//! A render call flows through these stages:
//! - the template name is resolved to an absolute source path
//! - the on-disk cache is consulted using the source's last known dependency set
//! - on a miss, the [`templating::Compiler`] parses the source, merges
//!   `extends` chains, inlines `include`s and validates filter chains
//! - the resulting [`templating::Program`] is persisted, then interpreted by the
//!   [`templating::Renderer`] against a private copy of the caller's bindings
//!
//! # Core Modules
//!
//! - [`templating`] - Parser, compiler, filters, renderer, cache and the
//!   [`templating::Environment`] façade
//! - [`config`] - Engine configuration (`stencil.toml`)
//! - [`core`] - Top-level error type and user-facing error reporting
//! - [`cli`] - Command-line interface
//! - [`utils`] - File system helpers used by the cache
//!
//! # Template Syntax
//!
//! ```text
//! {% extends 'layout' %}
//! {% block content %}
//!   {% if user.admin %}Welcome back, {{ user.name|capitalize }}{% else %}Hello{% endif %}
//!   {% foreach items as item %}<li>{{ item }}</li>{% endforeach %}
//!   {% include 'footer' %}
//!   {% parent %}
//! {% endblock %}
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use serde_json::json;
//! use stencil::config::EngineConfig;
//! use stencil::templating::Environment;
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = EngineConfig::default().with_template_dir("templates");
//! let mut env = Environment::new(config)?;
//! let html = env.render("page", &json!({ "title": "Hello" }))?;
//! println!("{html}");
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod templating;
pub mod utils;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
