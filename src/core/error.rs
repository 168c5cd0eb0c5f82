//! Error handling for stencil
//!
//! The library reports failures through [`EngineError`], which wraps the
//! template-level errors ([`CompileError`], [`RenderError`]) and cache storage
//! errors ([`CacheError`]) alongside engine-level failures such as a missing
//! top-level template.
//!
//! The CLI converts any error into an [`ErrorContext`] with
//! [`user_friendly_error`] and prints it in colour.
//!
//! # Examples
//!
//! ```rust,no_run
//! use stencil::core::{EngineError, user_friendly_error};
//!
//! let error = EngineError::TemplateNotFound {
//!     name: "page".to_string(),
//!     searched: vec![],
//! };
//! user_friendly_error(anyhow::Error::from(error)).display();
//! ```

use colored::Colorize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::templating::{CacheError, CompileError, CompileErrorKind, RenderError};

/// The main error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The template passed to `render`/`compile` could not be resolved.
    #[error("Template '{name}' not found")]
    TemplateNotFound { name: String, searched: Vec<PathBuf> },

    /// Render variables were not a JSON object.
    #[error("Template variables must be a JSON object, found {found}")]
    InvalidBindings { found: &'static str },

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Invalid configuration: {message}")]
    Config { message: String },
}

impl EngineError {
    /// True for a missing top-level template or a missing extends/include target.
    pub fn is_template_not_found(&self) -> bool {
        match self {
            EngineError::TemplateNotFound { .. } => true,
            EngineError::Compile(e) => e.is_template_not_found(),
            _ => false,
        }
    }
}

/// An error message with optional details and suggestion, for terminal output.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub message: String,
    pub suggestion: Option<String>,
    pub details: Option<String>,
}

impl ErrorContext {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
            details: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print to stderr: error in red, details in yellow, suggestion in green.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.message);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

fn compile_context(error: &CompileError) -> ErrorContext {
    let suggestion = match error.kind() {
        CompileErrorKind::TemplateNotFound { .. } => {
            "Check the name in the extends/include directive and the template directory"
        }
        CompileErrorKind::CircularDependency { .. } => {
            "Remove the extends/include that leads back to a template already in the chain"
        }
        CompileErrorKind::UnknownFilter { .. } => {
            "Use a built-in filter or register the function with FilterRegistry::add"
        }
        CompileErrorKind::Syntax { .. } => "Check that every directive is closed and properly nested",
        CompileErrorKind::Io { .. } => "Check that the template file is readable",
        CompileErrorKind::Codegen(_) => "This is a bug; please report it with the template that triggered it",
    };

    ErrorContext::new(format!("{}: {}", error, error.kind()))
        .with_details(error.format_with_context())
        .with_suggestion(suggestion)
}

fn render_context(error: &RenderError) -> ErrorContext {
    ErrorContext::new(format!("{}: {}", error, error.kind()))
        .with_details(error.format_with_context())
        .with_suggestion("Check the variables passed to the template")
}

fn create_error_context(error: &EngineError) -> ErrorContext {
    match error {
        EngineError::TemplateNotFound { searched, .. } => {
            let mut context = ErrorContext::new(error.to_string())
                .with_suggestion("Check the template name and --template-dir");
            if !searched.is_empty() {
                let paths: Vec<String> = searched.iter().map(|p| p.display().to_string()).collect();
                context = context.with_details(format!("Searched: {}", paths.join(", ")));
            }
            context
        }
        EngineError::InvalidBindings { .. } => ErrorContext::new(error.to_string())
            .with_suggestion("Pass variables as a JSON object, e.g. '{\"name\": \"value\"}'"),
        EngineError::Compile(e) => compile_context(e),
        EngineError::Render(e) => render_context(e),
        EngineError::Cache(e) => {
            let mut context = ErrorContext::new(e.to_string()).with_suggestion(
                "Check permissions on the cache directory or run 'stencil cache clear'",
            );
            if let Some(source) = std::error::Error::source(e) {
                context = context.with_details(source.to_string());
            }
            context
        }
        EngineError::Config { .. } => ErrorContext::new(error.to_string())
            .with_suggestion("Check the syntax of stencil.toml"),
    }
}

/// Convert any error into a user-friendly format with contextual suggestions.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    let mut current: &dyn std::error::Error = error.as_ref();
    loop {
        if let Some(engine_error) = current.downcast_ref::<EngineError>() {
            return create_error_context(engine_error);
        }
        if let Some(compile_error) = current.downcast_ref::<CompileError>() {
            return compile_context(compile_error);
        }
        if let Some(render_error) = current.downcast_ref::<RenderError>() {
            return render_context(render_error);
        }
        if let Some(toml_error) = current.downcast_ref::<toml::de::Error>() {
            return ErrorContext::new(format!("{error:#}"))
                .with_details(toml_error.to_string())
                .with_suggestion("Check the TOML syntax in your configuration file");
        }

        match current.source() {
            Some(source) => current = source,
            None => break,
        }
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        if io_error.kind() == std::io::ErrorKind::PermissionDenied {
            return ErrorContext::new(format!("{error:#}"))
                .with_suggestion("Check file permissions and try running with appropriate privileges");
        }
    }

    ErrorContext::new(format!("{error:#}"))
}
