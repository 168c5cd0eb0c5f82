//! Template compiler, cache and renderer.
//!
//! Templates are text files with a small directive syntax. They are compiled
//! into a serializable [`Program`], cached on disk keyed on the modification
//! times of every file involved, and executed against JSON variables.
//!
//! # Syntax
//!
//! - Interpolation: `{{ user.name }}`, `{{ title|upper }}`, `{{ html|raw }}`
//! - Conditionals: `{% if a %}…{% elseif b %}…{% else %}…{% endif %}`
//! - Loops: `{% foreach items as item %}…{% endforeach %}`,
//!   `{% foreach map as key => value %}`, `{% for item in items %}…{% endfor %}`,
//!   `{% for key, value in map %}`
//! - Inheritance: `{% extends 'base' %}`, `{% block name %}…{% endblock %}`,
//!   `{% parent %}`
//! - Inclusion: `{% include 'partials/footer' %}`
//! - Comments: `{# ignored #}`
//! - Verbatim text: `{% literal %}{{ shown as-is }}{% endliteral %}`
//!
//! Interpolations are HTML-escaped unless the filter chain contains `raw` (or
//! auto-escaping is disabled in [`EngineConfig`]). Filters must be registered in
//! the [`FilterRegistry`]; an unknown filter name is a compile error.
//!
//! Embedded server-side script spans (`<? … ?>`, `<% … %>`) are stripped before
//! parsing.
//!
//! # Inheritance
//!
//! A child template that `extends` a parent contributes only its blocks. Each
//! block in the parent is replaced by the child's block of the same name, with
//! `{% parent %}` standing for the parent's original body:
//!
//! ```text
//! base.html:   <title>{% block title %}Site{% endblock %}</title>
//! page.html:   {% extends 'base' %}{% block title %}Page - {% parent %}{% endblock %}
//! rendered:    <title>Page - Site</title>
//! ```
//!
//! Chains of any depth are supported. A cycle through any mix of `extends` and
//! `include` is reported as [`CompileErrorKind::CircularDependency`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use stencil::config::EngineConfig;
//! use stencil::templating::Environment;
//! use serde_json::json;
//!
//! # fn example() -> anyhow::Result<()> {
//! let mut env = Environment::new(EngineConfig::default().with_template_dir("views"))?;
//! env.registry_mut().add("shout", |v| {
//!     Ok(json!(format!("{}!", stencil::templating::filters::stringify(v))))
//! });
//!
//! let html = env.render("page", &json!({"title": "Hello"}))?;
//! println!("{html}");
//! # Ok(())
//! # }
//! ```
//!
//! [`EngineConfig`]: crate::config::EngineConfig

pub mod cache;
pub mod compiler;
pub mod environment;
pub mod error;
pub mod expr;
pub mod filters;
pub mod parser;
pub mod program;
pub mod renderer;

pub use cache::{CacheError, CacheKey, CacheMetadata, Lookup, SourceIndex, TemplateCache};
pub use compiler::{CompilationResult, Compiler, CompilerOptions, Resolution};
pub use environment::{CompiledTemplate, Environment, RenderStats};
pub use error::{CompileError, CompileErrorKind, RenderError, RenderErrorKind};
pub use filters::{Filter, FilterRegistry};
pub use program::{Node, Program};
pub use renderer::Renderer;
