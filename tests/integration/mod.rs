//! Integration test suite for stencil
//!
//! End-to-end tests that exercise the public API and the `stencil` binary
//! against real template and cache directories.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **render**: Interpolation, escaping, filters, control flow
//! - **inheritance**: `extends`/`block`/`parent`, `include`, cycle detection
//! - **cache**: Cache keys, freshness, recompilation and eviction
//! - **cli**: The `stencil` binary

mod cache;
mod cli;
mod inheritance;
mod render;
