//! Global constants used throughout the Stencil codebase.
//!
//! Defaults, file naming and retry limits that are shared between the
//! compiler, the cache and the CLI live here so they stay discoverable.

/// Default file extension tried when a template name has none.
pub const DEFAULT_EXTENSION: &str = "html";

/// Default template directory, relative to the working directory.
pub const DEFAULT_TEMPLATE_DIR: &str = "templates";

/// Directory name used under the platform cache directory.
pub const CACHE_DIR_NAME: &str = "stencil";

/// Fallback cache directory when the platform cache directory is unknown.
pub const FALLBACK_CACHE_DIR: &str = ".stencil-cache";

/// Name of the project-local configuration file.
pub const CONFIG_FILE_NAME: &str = "stencil.toml";

/// Environment variable that overrides the configuration file location.
pub const CONFIG_ENV_VAR: &str = "STENCIL_CONFIG";

/// How many times a stale cache entry is evicted and regenerated within one
/// render call before the freshly compiled program is used as-is.
pub const MAX_STALE_RETRIES: usize = 1;

/// Version of the serialized program format.
///
/// Mixed into every cache key so programs written by an older layout are never
/// read back.
pub const PROGRAM_FORMAT_VERSION: u32 = 1;

/// Maximum allowed Levenshtein distance as a percentage of target length for suggestions.
pub const SIMILARITY_THRESHOLD_PERCENT: usize = 50;

/// Maximum number of "did you mean" suggestions attached to an error.
pub const MAX_SUGGESTIONS: usize = 3;

/// File suffix of compiled program files inside the cache directory.
pub const CODE_SUFFIX: &str = "code.json";

/// File suffix of cache metadata files.
pub const META_SUFFIX: &str = "meta.json";

/// Subdirectory of the cache holding per-source dependency indexes.
pub const INDEX_DIR: &str = "index";
