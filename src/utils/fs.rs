//! File system utilities for the compile cache
//!
//! All writes go through [`atomic_write`], which writes into a uniquely named
//! temporary file in the destination directory and renames it into place. Two
//! processes writing the same cache key therefore never interleave bytes; the
//! last rename wins.
//!
//! # Examples
//!
//! ```rust,no_run
//! use stencil::utils::fs::{ensure_dir, atomic_write, get_modified_time};
//! use std::path::Path;
//!
//! # fn example() -> anyhow::Result<()> {
//! ensure_dir(Path::new("cache"))?;
//! atomic_write(Path::new("cache/entry.code.json"), b"[]")?;
//! let mtime = get_modified_time(Path::new("cache/entry.code.json"))?;
//! # let _ = mtime;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::SystemTime;

/// Create `path` and its parents unless it is already a directory.
///
/// # Errors
///
/// Fails if `path` is a file or cannot be created.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    } else if !path.is_dir() {
        return Err(anyhow::anyhow!("Path exists but is not a directory: {}", path.display()));
    }
    Ok(())
}

/// Write `content` to a synced temp file in `path`'s directory, then rename it over `path`.
///
/// # Errors
///
/// Fails if the directory, temp file, write or rename fails.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    ensure_dir(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in: {}", parent.display()))?;

    temp.write_all(content)
        .with_context(|| format!("Failed to write temp file for: {}", path.display()))?;
    temp.as_file().sync_all().with_context(|| "Failed to sync file to disk")?;

    temp.persist(path)
        .with_context(|| format!("Failed to rename temp file to: {}", path.display()))?;

    Ok(())
}

/// Read `path` as UTF-8 text.
pub fn read_text_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read file: {}", path.display()))
}

/// Whether `path` exists. Broken symlinks and permission errors count as absent.
pub fn exists(path: &Path) -> bool {
    path.try_exists().unwrap_or(false)
}

/// Last modification time of `path`.
pub fn get_modified_time(path: &Path) -> Result<SystemTime> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("Failed to get metadata for: {}", path.display()))?;

    metadata
        .modified()
        .with_context(|| format!("Failed to get modification time for: {}", path.display()))
}

/// Remove `path` if present; returns whether anything was removed.
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => {
            Err(e).with_context(|| format!("Failed to remove file: {}", path.display()))
        }
    }
}

/// Hex-encoded SHA-256 digest of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
