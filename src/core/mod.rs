//! Core types shared by the library and the CLI
//!
//! - [`EngineError`]: the error type returned by [`Environment`] operations
//! - [`ErrorContext`]: a message with optional details and suggestion for terminal output
//! - [`user_friendly_error`]: converts any error into an [`ErrorContext`]
//!
//! [`Environment`]: crate::templating::Environment

pub mod error;

pub use error::{EngineError, ErrorContext, user_friendly_error};
