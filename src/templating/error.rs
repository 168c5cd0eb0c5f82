//! Template error types
//!
//! Compilation failures are reported as [`CompileError`], which carries the path
//! of the template being processed and the underlying [`CompileErrorKind`].
//! Failures while executing a compiled program are reported as [`RenderError`]
//! with the template name and a [`RenderErrorKind`]. Both provide
//! [`format_with_context`](CompileError::format_with_context) for CLI output.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Why compilation failed.
#[derive(Debug, Error)]
pub enum CompileErrorKind {
    /// An `extends` or `include` target does not exist.
    #[error("Template '{name}' not found")]
    TemplateNotFound { name: String, searched: Vec<PathBuf> },

    /// An `extends`/`include` chain leads back to a template already being processed.
    #[error("Circular dependency detected: {}", format_chain(chain))]
    CircularDependency { path: PathBuf, chain: Vec<PathBuf> },

    #[error("Syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },

    /// A filter chain names a filter that is not registered.
    #[error("Unknown filter '{name}' at line {line}")]
    UnknownFilter {
        name: String,
        line: usize,
        suggestions: Vec<String>,
    },

    #[error("Failed to read template {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize compiled program")]
    Codegen(#[from] serde_json::Error),
}

/// A compilation failure with the template it occurred in.
#[derive(Debug, Error)]
#[error("Failed to compile template {}", display_template(path.as_deref()))]
pub struct CompileError {
    /// Template being processed when the failure occurred; `None` for inline source.
    pub path: Option<PathBuf>,
    #[source]
    pub kind: CompileErrorKind,
}

impl CompileError {
    pub fn new(path: Option<&Path>, kind: CompileErrorKind) -> Self {
        Self {
            path: path.map(Path::to_path_buf),
            kind,
        }
    }

    pub fn kind(&self) -> &CompileErrorKind {
        &self.kind
    }

    pub fn is_template_not_found(&self) -> bool {
        matches!(self.kind, CompileErrorKind::TemplateNotFound { .. })
    }

    pub fn is_circular_dependency(&self) -> bool {
        matches!(self.kind, CompileErrorKind::CircularDependency { .. })
    }

    /// Generate a user-friendly error message with context and suggestions
    pub fn format_with_context(&self) -> String {
        let mut msg = String::new();
        msg.push_str("ERROR: Template Compilation Failed\n\n");
        msg.push_str(&format!("Template: {}\n", display_template(self.path.as_deref())));
        msg.push_str(&format!("Error: {}\n", self.kind));

        match &self.kind {
            CompileErrorKind::TemplateNotFound { searched, .. } => {
                if !searched.is_empty() {
                    msg.push_str("\nSearched:\n");
                    for path in searched {
                        msg.push_str(&format!("  {}\n", path.display()));
                    }
                }
                msg.push_str("\nSUGGESTION: Check the name in the extends/include directive.\n");
            }
            CompileErrorKind::CircularDependency { chain, .. } => {
                msg.push_str("\nCircular chain:\n");
                for (i, path) in chain.iter().enumerate() {
                    if i > 0 {
                        msg.push_str("  ↓\n");
                    }
                    msg.push_str(&format!("  {}\n", path.display()));
                }
                msg.push_str("\nSUGGESTION: Remove the extends/include that creates the cycle.\n");
            }
            CompileErrorKind::Syntax { .. } => {
                msg.push_str("\nSUGGESTION: Check template syntax for unclosed tags.\n");
                msg.push_str("Common issues:\n");
                msg.push_str("  - Unclosed {{ }} or {% %} delimiters\n");
                msg.push_str("  - Missing {% endif %}, {% endforeach %} or {% endblock %}\n");
                msg.push_str("  - Unquoted names in extends/include\n");
            }
            CompileErrorKind::UnknownFilter { suggestions, .. } => {
                if !suggestions.is_empty() {
                    msg.push_str("\nDid you mean one of these?\n");
                    for suggestion in suggestions {
                        msg.push_str(&format!("  - {}\n", suggestion));
                    }
                }
                msg.push_str("\nSUGGESTION: Register custom filters with FilterRegistry::add.\n");
            }
            CompileErrorKind::Io { source, .. } => {
                msg.push_str(&format!("Cause: {}\n", source));
            }
            CompileErrorKind::Codegen(_) => {}
        }

        msg
    }
}

/// Why rendering failed.
#[derive(Debug, Error)]
pub enum RenderErrorKind {
    #[error("Template variable not found: '{name}'")]
    UndefinedVariable { name: String, suggestions: Vec<String> },

    #[error("Invalid expression '{expr}': {message}")]
    Expression { expr: String, message: String },

    #[error("Invalid loop header '{header}': {message}")]
    InvalidLoop { header: String, message: String },

    #[error("Cannot iterate over {found} in '{expr}'")]
    NotIterable { expr: String, found: &'static str },

    #[error("Filter '{name}' failed: {message}")]
    Filter { name: String, message: String },

    #[error("Unknown filter '{name}'")]
    UnknownFilter { name: String },

    #[error("Invalid compiled program: {message}")]
    InvalidProgram { message: String },
}

/// A failure while executing a compiled program.
#[derive(Debug, Error)]
#[error("Failed to render template '{template}'")]
pub struct RenderError {
    pub template: String,
    #[source]
    pub kind: RenderErrorKind,
}

impl RenderError {
    pub fn new(template: impl Into<String>, kind: RenderErrorKind) -> Self {
        Self {
            template: template.into(),
            kind,
        }
    }

    pub fn kind(&self) -> &RenderErrorKind {
        &self.kind
    }

    /// Generate a user-friendly error message with context and suggestions
    pub fn format_with_context(&self) -> String {
        let mut msg = String::new();
        msg.push_str("ERROR: Template Rendering Failed\n\n");
        msg.push_str(&format!("Template: {}\n", self.template));
        msg.push_str(&format!("Error: {}\n", self.kind));

        match &self.kind {
            RenderErrorKind::UndefinedVariable { suggestions, .. } if !suggestions.is_empty() => {
                msg.push_str("\nDid you mean one of these?\n");
                for suggestion in suggestions {
                    msg.push_str(&format!("  - {}\n", suggestion));
                }
            }
            RenderErrorKind::NotIterable { .. } => {
                msg.push_str("\nSUGGESTION: Loops accept arrays, objects or null.\n");
            }
            _ => {}
        }

        msg
    }
}

fn display_template(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string()).unwrap_or_else(|| "<inline>".to_string())
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circular_message_lists_chain() {
        let err = CompileError::new(
            Some(Path::new("/t/a.html")),
            CompileErrorKind::CircularDependency {
                path: PathBuf::from("/t/a.html"),
                chain: vec![PathBuf::from("/t/a.html"), PathBuf::from("/t/b.html"), PathBuf::from("/t/a.html")],
            },
        );

        assert!(err.is_circular_dependency());
        assert_eq!(
            err.kind().to_string(),
            "Circular dependency detected: /t/a.html -> /t/b.html -> /t/a.html"
        );
        let formatted = err.format_with_context();
        assert!(formatted.contains("Circular chain"));
        assert!(formatted.contains("SUGGESTION"));
    }

    #[test]
    fn test_inline_template_display() {
        let err = CompileError::new(None, CompileErrorKind::Syntax {
            line: 2,
            message: "unexpected 'endif'".into(),
        });
        assert_eq!(err.to_string(), "Failed to compile template <inline>");
        assert!(err.format_with_context().contains("line 2"));
    }

    #[test]
    fn test_render_error_suggestions() {
        let err = RenderError::new("page", RenderErrorKind::UndefinedVariable {
            name: "titel".into(),
            suggestions: vec!["title".into()],
        });
        let formatted = err.format_with_context();
        assert!(formatted.contains("'titel'"));
        assert!(formatted.contains("- title"));
    }
}
