//! Configuration management for stencil
//!
//! Settings live in a TOML file:
//!
//! ```toml
//! template_dir = "templates"
//! cache_dir = "/var/cache/stencil"
//! extension = "html"
//! auto_escape = true
//! strict_variables = false
//! ```
//!
//! Every key is optional. The file is found by [`EngineConfig::load`]: an
//! explicit path, then the `STENCIL_CONFIG` environment variable, then
//! `stencil.toml` in the current directory. With none of these present the
//! defaults are used. Relative directories in a file are resolved against the
//! directory containing that file.

mod engine;

pub use engine::EngineConfig;
