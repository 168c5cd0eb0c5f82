//! File system utilities
//!
//! This module provides the storage primitives the compile cache is built on:
//! directory creation, atomic writes, text reads, modification times and removal.
//!
//! # Example
//!
//! ```rust,no_run
//! use stencil::utils::{ensure_dir, atomic_write};
//! use std::path::Path;
//!
//! # fn example() -> anyhow::Result<()> {
//! ensure_dir(Path::new("cache/index"))?;
//! atomic_write(Path::new("cache/entry.json"), b"{}")?;
//! # Ok(())
//! # }
//! ```

pub mod fs;

pub use fs::{
    atomic_write, ensure_dir, exists, get_modified_time, read_text_file, remove_file_if_exists, sha256_hex,
};
