//! Engine façade: resolve, look up or compile, cache, render.
//!
//! [`Environment::render`] is the main entry point:
//!
//! 1. the template name is resolved against the template directory
//! 2. if the cache has a source index for the file and every recorded
//!    `extends`/`include` name still locates the same file, the cache key is
//!    derived from the indexed dependencies and a fresh entry is used without
//!    compiling
//! 3. otherwise the template is compiled, the key is computed from the fresh
//!    dependency list, and the result is stored (stale entries are evicted and
//!    the compile retried up to [`MAX_STALE_RETRIES`] times)
//! 4. the program is executed against a private copy of the variables
//!
//! Counters for each of these decisions are available from
//! [`Environment::stats`].

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use super::cache::{CacheKey, CacheMetadata, Lookup, SourceIndex, TemplateCache};
use super::compiler::{Compiler, CompilerOptions};
use super::error::{CompileError, CompileErrorKind};
use super::filters::{FilterRegistry, value_kind};
use super::program::Program;
use super::renderer::Renderer;
use crate::config::EngineConfig;
use crate::constants::{MAX_STALE_RETRIES, PROGRAM_FORMAT_VERSION};
use crate::core::EngineError;

/// Cache and compile counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RenderStats {
    /// Calls to the compiler.
    pub compiles: usize,
    /// Programs served from the cache without compiling.
    pub hits: usize,
    /// Loads that needed a compile.
    pub misses: usize,
    /// Entries evicted because they were stale or unreadable.
    pub stale: usize,
}

impl RenderStats {
    /// Hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// A compiled template as loaded by [`Environment::compile`].
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    pub source: PathBuf,
    pub code: String,
    pub dependencies: Vec<PathBuf>,
    pub program: Program,
}

/// Template engine bound to a configuration, filter registry and cache.
#[derive(Debug)]
pub struct Environment {
    config: EngineConfig,
    registry: FilterRegistry,
    cache: TemplateCache,
    stats: RenderStats,
}

impl Environment {
    /// Create an environment with the built-in filters.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or the cache directory cannot be created.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_registry(config, FilterRegistry::with_defaults())
    }

    /// Create an environment with a custom filter registry.
    ///
    /// # Errors
    ///
    /// Fails if the configured extension is not a bare extension or the cache
    /// directory cannot be created.
    pub fn with_registry(config: EngineConfig, registry: FilterRegistry) -> Result<Self, EngineError> {
        let ext = &config.extension;
        if ext.starts_with('.') || ext.contains(['/', '\\']) {
            return Err(EngineError::Config {
                message: format!("extension '{ext}' must not start with '.' or contain path separators"),
            });
        }

        let cache = TemplateCache::new(&config.cache_dir)?;
        Ok(Self {
            config,
            registry,
            cache,
            stats: RenderStats::default(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    /// Mutable access for registering filters.
    pub fn registry_mut(&mut self) -> &mut FilterRegistry {
        &mut self.registry
    }

    pub fn cache(&self) -> &TemplateCache {
        &self.cache
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    fn compiler_options(&self) -> CompilerOptions {
        CompilerOptions {
            template_dir: self.config.template_dir.clone(),
            extension: self.config.extension.clone(),
            auto_escape: self.config.auto_escape,
        }
    }

    /// Settings that change generated code are folded into every cache key.
    fn key_salt(&self) -> String {
        format!(
            "v{};auto_escape={};ext={};dir={}",
            PROGRAM_FORMAT_VERSION,
            self.config.auto_escape,
            self.config.extension,
            self.config.template_dir.display()
        )
    }

    /// Resolve a template name to an absolute path in the template directory.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::TemplateNotFound`] with every path tried.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, EngineError> {
        Compiler::new(&self.registry, self.compiler_options())
            .locate(name, None)
            .map_err(|searched| EngineError::TemplateNotFound {
                name: name.to_string(),
                searched,
            })
    }

    /// Load the compiled form of `name`, compiling and caching it if needed.
    pub fn compile(&mut self, name: &str) -> Result<CompiledTemplate, EngineError> {
        let source = self.resolve(name)?;
        self.load(&source)
    }

    /// Render the template `name` with `vars`.
    ///
    /// `vars` must be a JSON object (or `null` for no variables). The caller's
    /// value is never modified.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] if the template cannot be resolved, compiled,
    /// cached or rendered. No partial output is returned on failure.
    pub fn render(&mut self, name: &str, vars: &Value) -> Result<String, EngineError> {
        let empty = Map::new();
        let bindings = bindings_of(vars, &empty)?;
        let compiled = self.compile(name)?;

        let output = Renderer::new(&self.registry, self.config.strict_variables).render(
            name,
            &compiled.program,
            bindings,
        )?;
        tracing::debug!("Rendered '{}' ({} bytes)", name, output.len());
        Ok(output)
    }

    /// Compile and render template text without touching the cache.
    ///
    /// `extends`/`include` names resolve against the template directory.
    pub fn render_str(&self, source: &str, vars: &Value) -> Result<String, EngineError> {
        let empty = Map::new();
        let bindings = bindings_of(vars, &empty)?;
        let result = Compiler::new(&self.registry, self.compiler_options()).compile(source, None)?;
        let program = Program::from_code(&result.code)
            .map_err(|e| CompileError::new(None, CompileErrorKind::Codegen(e)))?;

        Ok(Renderer::new(&self.registry, self.config.strict_variables).render(
            "<inline>",
            &program,
            bindings,
        )?)
    }

    /// Whether every name in `index` still locates the file it did at compile time.
    fn index_holds(&self, index: &SourceIndex) -> bool {
        let compiler = Compiler::new(&self.registry, self.compiler_options());
        match index.resolutions.iter().find(|r| !r.holds(&compiler)) {
            Some(moved) => {
                tracing::debug!(
                    "'{}' no longer resolves to {}; recompiling {}",
                    moved.name,
                    moved.resolved.display(),
                    index.source.display()
                );
                false
            }
            None => true,
        }
    }

    fn load(&mut self, source: &Path) -> Result<CompiledTemplate, EngineError> {
        let salt = self.key_salt();

        if let Some(index) = self.cache.source_index(source).filter(|index| self.index_holds(index)) {
            let key = CacheKey::compute(source, &index.dependencies, &salt)?;
            match self.cache.lookup(&key) {
                Lookup::Fresh { code, metadata } => match Program::from_code(&code) {
                    Ok(program) => {
                        self.stats.hits += 1;
                        tracing::debug!("Cache hit for {} ({})", source.display(), key);
                        return Ok(CompiledTemplate {
                            source: source.to_path_buf(),
                            code,
                            dependencies: metadata.dependencies,
                            program,
                        });
                    }
                    Err(e) => {
                        tracing::warn!("Evicting undecodable cache entry {}: {}", key, e);
                        self.cache.remove(&key)?;
                        self.stats.stale += 1;
                    }
                },
                Lookup::Stale => {
                    tracing::warn!("Evicting stale cache entry {} for {}", key, source.display());
                    self.cache.remove(&key)?;
                    self.stats.stale += 1;
                }
                Lookup::Missing => {}
            }
        }

        self.stats.misses += 1;
        let mut retries = 0;
        loop {
            let text = std::fs::read_to_string(source).map_err(|e| {
                CompileError::new(
                    Some(source),
                    CompileErrorKind::Io {
                        path: source.to_path_buf(),
                        source: e,
                    },
                )
            })?;

            let result = Compiler::new(&self.registry, self.compiler_options()).compile(&text, Some(source))?;
            self.stats.compiles += 1;

            let key = CacheKey::compute(source, &result.dependencies, &salt)?;
            match self.cache.lookup(&key) {
                Lookup::Stale if retries < MAX_STALE_RETRIES => {
                    retries += 1;
                    tracing::warn!(
                        "Evicting stale cache entry {} for {} (retry {}/{})",
                        key,
                        source.display(),
                        retries,
                        MAX_STALE_RETRIES
                    );
                    self.cache.remove(&key)?;
                    self.stats.stale += 1;
                    continue;
                }
                Lookup::Fresh { .. } => {
                    self.cache.write_index(&SourceIndex {
                        source: source.to_path_buf(),
                        dependencies: result.dependencies.clone(),
                        resolutions: result.resolutions.clone(),
                    })?;
                }
                Lookup::Missing | Lookup::Stale => {
                    let metadata = CacheMetadata::new(source, &result.dependencies);
                    self.cache.store(&key, &result.code, &metadata, &result.resolutions)?;
                }
            }

            let program = Program::from_code(&result.code)
                .map_err(|e| CompileError::new(Some(source), CompileErrorKind::Codegen(e)))?;
            return Ok(CompiledTemplate {
                source: source.to_path_buf(),
                code: result.code,
                dependencies: result.dependencies,
                program,
            });
        }
    }
}

fn bindings_of<'v>(vars: &'v Value, empty: &'v Map<String, Value>) -> Result<&'v Map<String, Value>, EngineError> {
    match vars {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(empty),
        other => Err(EngineError::InvalidBindings {
            found: value_kind(other),
        }),
    }
}
