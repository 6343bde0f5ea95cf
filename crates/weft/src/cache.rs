//! On-disk compilation cache: one directory per graph name holding the
//! compiler input, output, command line, and statistics.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use log::{debug, warn};

use crate::types::{Error, Result};

pub const COMPILE_INPUT_FILENAME: &str = "iree-compile-input.mlir";
pub const COMPILE_OUTPUT_FILENAME: &str = "iree-compile-output.vmfb";
pub const COMPILE_COMMAND_FILENAME: &str = "iree-compile-command.txt";
pub const COMPILE_STATISTICS_FILENAME: &str = "iree-compile-statistics.json";

/// Selects one of the four cached files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedAssetKind {
    Input,
    Output,
    CompileCommand,
    Statistics,
}

impl CachedAssetKind {
    fn file_name(self) -> &'static str {
        match self {
            CachedAssetKind::Input => COMPILE_INPUT_FILENAME,
            CachedAssetKind::Output => COMPILE_OUTPUT_FILENAME,
            CachedAssetKind::CompileCommand => COMPILE_COMMAND_FILENAME,
            CachedAssetKind::Statistics => COMPILE_STATISTICS_FILENAME,
        }
    }
}

static CACHE_ROOT_OVERRIDE: OnceLock<PathBuf> = OnceLock::new();

/// Overrides the cache root for this process. First caller wins; used
/// by tests and embedders that cannot rely on environment variables.
pub fn set_cache_root_override(path: impl Into<PathBuf>) {
    let _ = CACHE_ROOT_OVERRIDE.set(path.into());
}

/// Resolves the cache root: programmatic override, then
/// `WEFT_CACHE_DIR`, then `.cache/weft`.
pub fn cache_root() -> PathBuf {
    if let Some(root) = CACHE_ROOT_OVERRIDE.get() {
        return root.clone();
    }
    if let Ok(value) = std::env::var("WEFT_CACHE_DIR") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    PathBuf::from(".cache/weft")
}

/// Replaces path-hostile characters so the graph name can serve as a
/// directory name. Distinct graph names used by concurrent compilers
/// must stay distinct after sanitization, so only the character class
/// changes.
pub fn sanitize_graph_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// A single cached file with a canonical path and an optional
/// remove-on-drop flag (scoped cleanup of compilation artifacts).
#[derive(Debug)]
pub struct CacheFile {
    path: PathBuf,
    remove_on_drop: bool,
}

impl CacheFile {
    /// The canonical path for `file_name` under `graph_name`'s cache
    /// directory.
    pub fn canonical_path(graph_name: &str, file_name: &str) -> PathBuf {
        cache_root()
            .join(sanitize_graph_name(graph_name))
            .join(file_name)
    }

    /// Creates the cache directory (if needed) and returns a handle to
    /// the canonical path. The file itself is written later.
    pub fn create(graph_name: &str, file_name: &str, remove: bool) -> Result<CacheFile> {
        let path = Self::canonical_path(graph_name, file_name);
        let dir = path
            .parent()
            .expect("cache file path always has a parent directory");
        std::fs::create_dir_all(dir).map_err(|e| {
            Error::RuntimeFailure(format!("failed to create cache dir {}: {e}", dir.display()))
        })?;
        Ok(CacheFile {
            path,
            remove_on_drop: remove,
        })
    }

    /// Opens an existing cached file, failing if it is absent.
    pub fn open(graph_name: &str, file_name: &str) -> Result<CacheFile> {
        let path = Self::canonical_path(graph_name, file_name);
        if !path.exists() {
            return Err(Error::RuntimeFailure(format!(
                "cache file {} does not exist",
                path.display()
            )));
        }
        Ok(CacheFile {
            path,
            remove_on_drop: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<String> {
        let bytes = std::fs::read(&self.path).map_err(|e| {
            Error::RuntimeFailure(format!("failed to read {}: {e}", self.path.display()))
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn write(&self, contents: &str) -> Result<()> {
        std::fs::write(&self.path, contents).map_err(|e| {
            Error::RuntimeFailure(format!("failed to write {}: {e}", self.path.display()))
        })
    }
}

impl Drop for CacheFile {
    fn drop(&mut self) {
        if self.remove_on_drop && self.path.exists() {
            debug!("removing cache file {}", self.path.display());
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("failed to remove cache file {}: {e}", self.path.display());
            }
        }
    }
}

/// The cached quartet for one graph.
#[derive(Debug)]
pub struct CachedAssets {
    pub input: CacheFile,
    pub output: CacheFile,
    pub compile_command: CacheFile,
    pub statistics: CacheFile,
}

impl CachedAssets {
    /// Creates handles for all four canonical paths of `graph_name`.
    pub fn create(graph_name: &str, remove: bool) -> Result<CachedAssets> {
        Ok(CachedAssets {
            input: CacheFile::create(graph_name, COMPILE_INPUT_FILENAME, remove)?,
            output: CacheFile::create(graph_name, COMPILE_OUTPUT_FILENAME, remove)?,
            compile_command: CacheFile::create(graph_name, COMPILE_COMMAND_FILENAME, remove)?,
            statistics: CacheFile::create(graph_name, COMPILE_STATISTICS_FILENAME, remove)?,
        })
    }

    pub fn file(&self, kind: CachedAssetKind) -> &CacheFile {
        match kind {
            CachedAssetKind::Input => &self.input,
            CachedAssetKind::Output => &self.output,
            CachedAssetKind::CompileCommand => &self.compile_command,
            CachedAssetKind::Statistics => &self.statistics,
        }
    }

    /// True when every recorded path still equals the canonical path
    /// computed from `graph_name` (detects renames).
    pub fn paths_match(&self, graph_name: &str) -> bool {
        [
            CachedAssetKind::Input,
            CachedAssetKind::Output,
            CachedAssetKind::CompileCommand,
            CachedAssetKind::Statistics,
        ]
        .iter()
        .all(|&kind| {
            self.file(kind).path() == CacheFile::canonical_path(graph_name, kind.file_name())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitization_keeps_safe_characters() {
        assert_eq!(sanitize_graph_name("conv_n16-c128.f32"), "conv_n16-c128.f32");
        assert_eq!(sanitize_graph_name("a/b c:d"), "a_b_c_d");
    }

    #[test]
    fn asset_kind_file_names() {
        assert_eq!(
            CachedAssetKind::Input.file_name(),
            "iree-compile-input.mlir"
        );
        assert_eq!(
            CachedAssetKind::Statistics.file_name(),
            "iree-compile-statistics.json"
        );
    }
}
