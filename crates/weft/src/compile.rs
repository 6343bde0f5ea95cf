//! External compiler orchestration: command construction, process
//! invocation, and statistics capture.

use std::path::PathBuf;
use std::process::Command;
use std::sync::OnceLock;

use log::{debug, info};
use serde::Deserialize;

use crate::backend::Backend;
use crate::cache::CachedAssets;
use crate::types::{Error, Result};

static COMPILER_OVERRIDE: OnceLock<PathBuf> = OnceLock::new();

/// Overrides the compiler binary for this process. First caller wins;
/// used by tests and embedders that cannot rely on environment
/// variables.
pub fn set_compiler_override(path: impl Into<PathBuf>) {
    let _ = COMPILER_OVERRIDE.set(path.into());
}

/// Resolves the compiler binary: programmatic override, then
/// `WEFT_IREE_COMPILE`, then `iree-compile` on PATH.
pub fn compiler_binary() -> PathBuf {
    if let Some(path) = COMPILER_OVERRIDE.get() {
        return path.clone();
    }
    if let Ok(value) = std::env::var("WEFT_IREE_COMPILE") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    PathBuf::from("iree-compile")
}

/// A fully resolved compiler invocation. The rendered string is what
/// gets cached, so it must be a pure function of the graph name and
/// backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileCommand {
    argv: Vec<String>,
}

impl CompileCommand {
    /// Builds `<binary> <input> <backend flags> <stats flags> -o
    /// <output>` for the given cache quartet.
    pub fn build(backend: Backend, cache: &CachedAssets) -> CompileCommand {
        let mut argv = vec![
            compiler_binary().display().to_string(),
            cache.input.path().display().to_string(),
        ];
        argv.extend(backend.compile_flags().iter().map(|s| s.to_string()));
        argv.push("--iree-scheduling-dump-statistics-format=json".to_string());
        argv.push(format!(
            "--iree-scheduling-dump-statistics-file={}",
            cache.statistics.path().display()
        ));
        argv.push("-o".to_string());
        argv.push(cache.output.path().display().to_string());
        CompileCommand { argv }
    }

    /// The cached single-line rendering of the command.
    pub fn render(&self) -> String {
        let mut line = self.argv.join(" ");
        line.push('\n');
        line
    }

    /// Invokes the external compiler, failing on a non-zero exit.
    pub fn run(&self) -> Result<()> {
        info!("running compile command: {}", self.render().trim_end());
        let output = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .output()
            .map_err(|e| {
                Error::CompileFailure(format!("failed to spawn {}: {e}", self.argv[0]))
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::CompileFailure(format!(
                "compiler exited with {} (command: {}): {}",
                output.status,
                self.render().trim_end(),
                stderr.trim()
            )));
        }
        debug!("compile finished");
        Ok(())
    }
}

/// The subset of the compiler's statistics dump the library surfaces.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CompileStatistics {
    #[serde(rename = "dispatch-count")]
    pub dispatch_count: Option<u64>,
}

impl CompileStatistics {
    pub fn parse(json: &str) -> Result<CompileStatistics> {
        serde_json::from_str(json).map_err(|e| {
            Error::CompileFailure(format!("failed to parse compile statistics: {e}"))
        })
    }
}
