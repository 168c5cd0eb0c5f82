//! Durable compile cache.
//!
//! Compiled programs are stored under the cache directory as a pair of files
//! named after a [`CacheKey`]:
//!
//! - `<key>.code.json`: the generated code
//! - `<key>.meta.json`: [`CacheMetadata`] (`source`, `dependencies`, `compiled_at`)
//!
//! The key is a SHA-256 fingerprint over the source path and modification time
//! followed by every dependency path and modification time, so touching any file
//! in the set moves the template to a new key. An entry is only reused while
//! every recorded file still exists and is no newer than `compiled_at`.
//!
//! A per-source index (`index/<sha256(source)>.json`) remembers the dependency
//! list of the last compile and how each `extends`/`include` name was located,
//! which lets callers derive the key without compiling once they have checked
//! that every name still resolves to the same file.
//!
//! Files are written code first, then metadata, then index, each through
//! [`atomic_write`], so a reader that finds metadata always finds its code.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use thiserror::Error;

use super::compiler::Resolution;
use crate::constants::{CODE_SUFFIX, INDEX_DIR, META_SUFFIX};
use crate::utils::{
    atomic_write, ensure_dir, exists, get_modified_time, read_text_file, remove_file_if_exists,
    sha256_hex,
};

/// Cache storage failure.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache {operation} failed for {}", path.display())]
    Storage {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to encode cache metadata for {}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn storage(operation: &'static str, path: &Path) -> impl FnOnce(anyhow::Error) -> CacheError {
    let path = path.to_path_buf();
    move |source| CacheError::Storage {
        operation,
        path,
        source,
    }
}

/// Fingerprint of a source and its dependencies at their current mtimes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hash `salt`, then `source` and each dependency with its modification time.
    ///
    /// # Errors
    ///
    /// Fails if any file's metadata cannot be read.
    pub fn compute(source: &Path, dependencies: &[PathBuf], salt: &str) -> Result<Self, CacheError> {
        let mut material = String::with_capacity(64 * (dependencies.len() + 1));
        material.push_str(salt);
        material.push('\n');

        for path in std::iter::once(source).chain(dependencies.iter().map(PathBuf::as_path)) {
            let mtime = get_modified_time(path).map_err(storage("fingerprint", path))?;
            let nanos = mtime.duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or_default();
            material.push_str(&path.to_string_lossy());
            material.push('\0');
            material.push_str(&nanos.to_string());
            material.push('\n');
        }

        Ok(Self(sha256_hex(material.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata stored next to a cached program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub source: PathBuf,
    pub dependencies: Vec<PathBuf>,
    pub compiled_at: DateTime<Utc>,
}

impl CacheMetadata {
    pub fn new(source: &Path, dependencies: &[PathBuf]) -> Self {
        Self {
            source: source.to_path_buf(),
            dependencies: dependencies.to_vec(),
            compiled_at: Utc::now(),
        }
    }

    /// Whether the source and every dependency exist and are no newer than
    /// `compiled_at`.
    pub fn is_fresh(&self) -> bool {
        std::iter::once(&self.source).chain(&self.dependencies).all(|path| {
            match get_modified_time(path) {
                Ok(mtime) => DateTime::<Utc>::from(mtime) <= self.compiled_at,
                Err(_) => {
                    tracing::debug!("Cached dependency {} is gone", path.display());
                    false
                }
            }
        })
    }
}

/// Result of [`TemplateCache::lookup`].
#[derive(Debug)]
pub enum Lookup {
    /// Valid entry.
    Fresh { code: String, metadata: CacheMetadata },
    /// An entry exists but must not be used.
    Stale,
    Missing,
}

/// What the last compile of a source depended on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceIndex {
    pub source: PathBuf,
    pub dependencies: Vec<PathBuf>,
    #[serde(default)]
    pub resolutions: Vec<Resolution>,
}

/// File-backed store of compiled programs.
#[derive(Debug, Clone)]
pub struct TemplateCache {
    dir: PathBuf,
}

impl TemplateCache {
    /// Open the cache at `dir`, creating it if necessary.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        ensure_dir(&dir).map_err(storage("create", &dir))?;
        tracing::debug!("Using template cache at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of the generated code for `key`.
    pub fn code_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{key}.{CODE_SUFFIX}"))
    }

    pub fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{key}.{META_SUFFIX}"))
    }

    fn index_path(&self, source: &Path) -> PathBuf {
        let name = sha256_hex(source.to_string_lossy().as_bytes());
        self.dir.join(INDEX_DIR).join(format!("{name}.json"))
    }

    /// Look up `key`.
    ///
    /// Unreadable or undecodable metadata, missing code and failed freshness
    /// checks are all reported as [`Lookup::Stale`].
    pub fn lookup(&self, key: &CacheKey) -> Lookup {
        let meta_path = self.meta_path(key);
        if !exists(&meta_path) {
            return Lookup::Missing;
        }

        let metadata = match read_text_file(&meta_path)
            .and_then(|text| serde_json::from_str::<CacheMetadata>(&text).map_err(Into::into))
        {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!("Discarding unreadable cache metadata {}: {:#}", meta_path.display(), e);
                return Lookup::Stale;
            }
        };

        if !metadata.is_fresh() {
            tracing::debug!("Cache entry {} for {} is stale", key, metadata.source.display());
            return Lookup::Stale;
        }

        match read_text_file(&self.code_path(key)) {
            Ok(code) => Lookup::Fresh { code, metadata },
            Err(e) => {
                tracing::warn!("Cache entry {} has metadata but no code: {:#}", key, e);
                Lookup::Stale
            }
        }
    }

    /// Write code, then metadata, then the source index.
    ///
    /// # Errors
    ///
    /// Fails if any file cannot be written.
    pub fn store(
        &self,
        key: &CacheKey,
        code: &str,
        metadata: &CacheMetadata,
        resolutions: &[Resolution],
    ) -> Result<(), CacheError> {
        let code_path = self.code_path(key);
        atomic_write(&code_path, code.as_bytes()).map_err(storage("write", &code_path))?;

        let meta_path = self.meta_path(key);
        let meta = serde_json::to_vec_pretty(metadata).map_err(|source| CacheError::Encode {
            path: meta_path.clone(),
            source,
        })?;
        atomic_write(&meta_path, &meta).map_err(storage("write", &meta_path))?;

        self.write_index(&SourceIndex {
            source: metadata.source.clone(),
            dependencies: metadata.dependencies.clone(),
            resolutions: resolutions.to_vec(),
        })?;
        tracing::debug!("Cached {} as {}", metadata.source.display(), key);
        Ok(())
    }

    /// Record what the last compile of `index.source` depended on.
    pub fn write_index(&self, index: &SourceIndex) -> Result<(), CacheError> {
        let path = self.index_path(&index.source);
        let bytes = serde_json::to_vec(index).map_err(|source| CacheError::Encode {
            path: path.clone(),
            source,
        })?;
        atomic_write(&path, &bytes).map_err(storage("write", &path))
    }

    /// The index written by the last compile of `source`.
    ///
    /// Returns `None` when there is no index, it cannot be decoded, or any
    /// recorded dependency no longer exists.
    pub fn source_index(&self, source: &Path) -> Option<SourceIndex> {
        let path = self.index_path(source);
        if !exists(&path) {
            return None;
        }

        let record: SourceIndex = match read_text_file(&path)
            .and_then(|text| serde_json::from_str(&text).map_err(Into::into))
        {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!("Ignoring unreadable cache index {}: {:#}", path.display(), e);
                return None;
            }
        };

        if record.source != source || !record.dependencies.iter().all(|d| exists(d)) {
            return None;
        }
        Some(record)
    }

    /// Delete the code and metadata for `key`.
    pub fn remove(&self, key: &CacheKey) -> Result<(), CacheError> {
        let meta_path = self.meta_path(key);
        remove_file_if_exists(&meta_path).map_err(storage("remove", &meta_path))?;
        let code_path = self.code_path(key);
        remove_file_if_exists(&code_path).map_err(storage("remove", &code_path))?;
        Ok(())
    }

    /// Every entry with readable metadata, sorted by source path.
    pub fn entries(&self) -> Result<Vec<(CacheKey, CacheMetadata)>, CacheError> {
        let suffix = format!(".{META_SUFFIX}");
        let mut entries = Vec::new();

        for entry in std::fs::read_dir(&self.dir).map_err(|e| storage("list", &self.dir)(e.into()))? {
            let entry = entry.map_err(|e| storage("list", &self.dir)(e.into()))?;
            let file_name = entry.file_name();
            let Some(key) = file_name.to_str().and_then(|n| n.strip_suffix(&suffix)) else {
                continue;
            };

            let path = entry.path();
            match read_text_file(&path)
                .and_then(|text| serde_json::from_str::<CacheMetadata>(&text).map_err(Into::into))
            {
                Ok(metadata) => entries.push((CacheKey(key.to_string()), metadata)),
                Err(e) => tracing::debug!("Skipping {}: {:#}", path.display(), e),
            }
        }

        entries.sort_by(|a, b| a.1.source.cmp(&b.1.source).then_with(|| a.0.0.cmp(&b.0.0)));
        Ok(entries)
    }

    /// Remove every entry and index record. Returns the number of entries removed.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for (key, _) in self.entries()? {
            self.remove(&key)?;
            removed += 1;
        }

        let index_dir = self.dir.join(INDEX_DIR);
        if index_dir.is_dir() {
            std::fs::remove_dir_all(&index_dir).map_err(|e| storage("clear", &index_dir)(e.into()))?;
        }

        tracing::debug!("Cleared {} cache entries from {}", removed, self.dir.display());
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn touch(path: &Path, offset: Duration) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + offset).unwrap();
    }

    struct Setup {
        _temp: TempDir,
        cache: TemplateCache,
        source: PathBuf,
        dep: PathBuf,
    }

    fn setup() -> Setup {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("page.html");
        let dep = temp.path().join("part.html");
        fs::write(&source, "page").unwrap();
        fs::write(&dep, "part").unwrap();
        let cache = TemplateCache::new(temp.path().join("cache")).unwrap();
        Setup {
            _temp: temp,
            cache,
            source,
            dep,
        }
    }

    #[test]
    fn test_key_depends_on_mtime_and_salt() {
        let s = setup();
        let deps = vec![s.dep.clone()];
        let a = CacheKey::compute(&s.source, &deps, "v1").unwrap();
        assert_eq!(a, CacheKey::compute(&s.source, &deps, "v1").unwrap());
        assert_ne!(a, CacheKey::compute(&s.source, &deps, "v2").unwrap());
        assert_ne!(a, CacheKey::compute(&s.source, &[], "v1").unwrap());

        touch(&s.dep, Duration::from_secs(5));
        assert_ne!(a, CacheKey::compute(&s.source, &deps, "v1").unwrap());
    }

    #[test]
    fn test_key_for_missing_file_fails() {
        let s = setup();
        let ghost = s.dep.with_file_name("ghost.html");
        assert!(CacheKey::compute(&s.source, &[ghost], "").is_err());
    }

    #[test]
    fn test_store_and_lookup() {
        let s = setup();
        let deps = vec![s.dep.clone()];
        let key = CacheKey::compute(&s.source, &deps, "").unwrap();
        assert!(matches!(s.cache.lookup(&key), Lookup::Missing));

        let metadata = CacheMetadata::new(&s.source, &deps);
        s.cache.store(&key, "{\"code\":1}", &metadata, &[]).unwrap();

        match s.cache.lookup(&key) {
            Lookup::Fresh { code, metadata: found } => {
                assert_eq!(code, "{\"code\":1}");
                assert_eq!(found, metadata);
            }
            other => panic!("expected fresh entry, got {other:?}"),
        }
        let index = s.cache.source_index(&s.source).unwrap();
        assert_eq!(index.dependencies, deps);
        assert!(index.resolutions.is_empty());
    }

    #[test]
    fn test_newer_dependency_is_stale() {
        let s = setup();
        let deps = vec![s.dep.clone()];
        let key = CacheKey::compute(&s.source, &deps, "").unwrap();
        s.cache.store(&key, "{}", &CacheMetadata::new(&s.source, &deps), &[]).unwrap();

        touch(&s.dep, Duration::from_secs(60));
        assert!(matches!(s.cache.lookup(&key), Lookup::Stale));
    }

    #[test]
    fn test_missing_dependency_is_stale() {
        let s = setup();
        let deps = vec![s.dep.clone()];
        let key = CacheKey::compute(&s.source, &deps, "").unwrap();
        s.cache.store(&key, "{}", &CacheMetadata::new(&s.source, &deps), &[]).unwrap();

        fs::remove_file(&s.dep).unwrap();
        assert!(matches!(s.cache.lookup(&key), Lookup::Stale));
        assert_eq!(s.cache.source_index(&s.source), None);
    }

    #[test]
    fn test_corrupt_metadata_is_stale() {
        let s = setup();
        let key = CacheKey::compute(&s.source, &[], "").unwrap();
        fs::write(s.cache.meta_path(&key), "not json").unwrap();
        assert!(matches!(s.cache.lookup(&key), Lookup::Stale));
    }

    #[test]
    fn test_corrupt_index_is_ignored() {
        let s = setup();
        let path = s.cache.index_path(&s.source);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{").unwrap();
        assert_eq!(s.cache.source_index(&s.source), None);
    }

    #[test]
    fn test_remove_entries_and_clear() {
        let s = setup();
        let key = CacheKey::compute(&s.source, &[], "").unwrap();
        s.cache.store(&key, "{}", &CacheMetadata::new(&s.source, &[]), &[]).unwrap();
        assert_eq!(s.cache.entries().unwrap().len(), 1);

        s.cache.remove(&key).unwrap();
        assert!(matches!(s.cache.lookup(&key), Lookup::Missing));
        assert!(s.cache.entries().unwrap().is_empty());

        s.cache.store(&key, "{}", &CacheMetadata::new(&s.source, &[]), &[]).unwrap();
        assert_eq!(s.cache.clear().unwrap(), 1);
        assert!(s.cache.entries().unwrap().is_empty());
        assert_eq!(s.cache.source_index(&s.source), None);
    }

    #[test]
    fn test_creates_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("a/b/c");
        let cache = TemplateCache::new(&dir).unwrap();
        assert!(cache.dir().is_dir());
    }

    #[test]
    fn test_unusable_directory_fails() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file");
        fs::write(&file, "x").unwrap();
        assert!(matches!(TemplateCache::new(&file), Err(CacheError::Storage { .. })));
    }
}
