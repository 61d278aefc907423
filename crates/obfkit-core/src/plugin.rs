//! Plugin build caching.
//!
//! The pass plugin is built from its own CMake tree. A build is reused when
//! the artifact exists and its recorded cache key matches the current one,
//! where the key hashes the plugin sources together with the toolchain
//! location used to configure the build.

use crate::command::CommandSpec;
use crate::error::Result;
use crate::obs;
use crate::runner::{run_checked, CommandExecutor};
use crate::workspace::Workspace;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Toolchain location used when neither the request nor `LLVM_DIR` names one.
pub const DEFAULT_LLVM_DIR: &str = "/usr/lib/llvm-14/lib/cmake/llvm";

/// Environment variable consulted for the toolchain location.
pub const LLVM_DIR_ENV: &str = "LLVM_DIR";

const SOURCE_EXTENSIONS: &[&str] = &["cpp", "cc", "c", "h", "hpp"];

/// Plugin build configuration carried by a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginBuildConfig {
    /// Explicit LLVM CMake package directory.
    pub llvm_dir: Option<PathBuf>,
}

impl PluginBuildConfig {
    pub fn with_llvm_dir(llvm_dir: impl Into<PathBuf>) -> Self {
        Self {
            llvm_dir: Some(llvm_dir.into()),
        }
    }

    /// Toolchain location: explicit override, then `LLVM_DIR`, then
    /// [`DEFAULT_LLVM_DIR`].
    pub fn resolve_llvm_dir(&self) -> PathBuf {
        resolve_llvm_dir(
            self.llvm_dir.as_deref(),
            std::env::var_os(LLVM_DIR_ENV).map(PathBuf::from),
        )
    }
}

/// Pure priority resolution behind [`PluginBuildConfig::resolve_llvm_dir`].
pub fn resolve_llvm_dir(explicit: Option<&Path>, from_env: Option<PathBuf>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| from_env.filter(|p| !p.as_os_str().is_empty()))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LLVM_DIR))
}

/// How `ensure_plugin` satisfied the request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
    /// Artifact and stamp matched the current key.
    Hit,
    /// Artifact existed without a stamp and was taken as-is.
    Adopted,
    /// Artifact was missing and got built.
    Built,
    /// Artifact existed under a different key and got rebuilt.
    Rebuilt,
}

impl CacheOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Adopted => "adopted",
            CacheOutcome::Built => "built",
            CacheOutcome::Rebuilt => "rebuilt",
        }
    }

    /// Whether configure/build commands were issued.
    pub fn issued_build(&self) -> bool {
        matches!(self, CacheOutcome::Built | CacheOutcome::Rebuilt)
    }
}

/// The plugin library as seen after `ensure_plugin`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginArtifact {
    pub path: PathBuf,
    pub exists: bool,
    pub cache_key: String,
    pub outcome: CacheOutcome,
}

/// Contents of `build/plugin.stamp.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginStamp {
    pub cache_key: String,
    pub llvm_dir: PathBuf,
    pub recorded_at: DateTime<Utc>,
}

/// Ensures the plugin library exists and is current for one workspace.
pub struct PluginBuilder {
    workspace: Workspace,
    executor: Arc<dyn CommandExecutor>,
    cmake: String,
    timeout_secs: u64,
    ensured: Mutex<Option<PluginArtifact>>,
}

impl PluginBuilder {
    pub fn new(workspace: Workspace, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            workspace,
            executor,
            cmake: "cmake".to_string(),
            timeout_secs: 0,
            ensured: Mutex::new(None),
        }
    }

    pub fn with_cmake(mut self, cmake: impl Into<String>) -> Self {
        self.cmake = cmake.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Make sure the plugin exists, building it at most once per key.
    ///
    /// Configure or build failures abort with the failing command.
    pub async fn ensure_plugin(&self, config: &PluginBuildConfig) -> Result<PluginArtifact> {
        let mut ensured = self.ensured.lock().await;
        let llvm_dir = config.resolve_llvm_dir();
        let cache_key = compute_cache_key(&self.workspace, &llvm_dir)?;
        let path = self.workspace.plugin_path().to_path_buf();

        if let Some(prev) = ensured.as_ref() {
            if prev.cache_key == cache_key {
                debug!(path = %path.display(), "plugin already ensured in this workspace");
                let artifact = PluginArtifact {
                    exists: path.exists() || prev.exists,
                    outcome: CacheOutcome::Hit,
                    ..prev.clone()
                };
                return Ok(artifact);
            }
        }

        let stamp = read_stamp(&self.workspace.plugin_stamp_path());
        let outcome = match (path.exists(), stamp) {
            (true, Some(stamp)) if stamp.cache_key == cache_key => CacheOutcome::Hit,
            (true, None) => CacheOutcome::Adopted,
            (true, Some(_)) => CacheOutcome::Rebuilt,
            (false, _) => CacheOutcome::Built,
        };

        if outcome.issued_build() {
            self.configure_and_build(&llvm_dir).await?;
        }
        if outcome != CacheOutcome::Hit {
            write_stamp(&self.workspace.plugin_stamp_path(), &cache_key, &llvm_dir)?;
        }

        let exists = path.exists();
        if !exists {
            warn!(path = %path.display(), "plugin artifact not found after build step");
        }
        obs::emit_plugin_cache(outcome.as_str(), &cache_key, &path.to_string_lossy());

        let artifact = PluginArtifact {
            path,
            exists,
            cache_key,
            outcome,
        };
        *ensured = Some(artifact.clone());
        Ok(artifact)
    }

    async fn configure_and_build(&self, llvm_dir: &Path) -> Result<()> {
        let configure = CommandSpec::new("plugin_configure", &self.cmake)
            .arg("-S")
            .path_arg(self.workspace.plugin_source_dir())
            .arg("-B")
            .path_arg(self.workspace.build_dir())
            .arg(format!("-DLLVM_DIR={}", llvm_dir.display()))
            .current_dir(self.workspace.root())
            .timeout(self.timeout_secs);
        run_checked(self.executor.as_ref(), &configure).await?;

        let build = CommandSpec::new("plugin_build", &self.cmake)
            .arg("--build")
            .path_arg(self.workspace.build_dir())
            .arg("-j")
            .current_dir(self.workspace.root())
            .timeout(self.timeout_secs);
        run_checked(self.executor.as_ref(), &build).await?;
        Ok(())
    }
}

fn read_stamp(path: &Path) -> Option<PluginStamp> {
    let bytes = std::fs::read(path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(stamp) => Some(stamp),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable plugin stamp");
            None
        }
    }
}

fn write_stamp(path: &Path, cache_key: &str, llvm_dir: &Path) -> Result<()> {
    let stamp = PluginStamp {
        cache_key: cache_key.to_string(),
        llvm_dir: llvm_dir.to_path_buf(),
        recorded_at: Utc::now(),
    };
    std::fs::write(path, serde_json::to_vec_pretty(&stamp)?)?;
    Ok(())
}

/// Cache key for the plugin: hash of its sources plus the toolchain location.
pub fn compute_cache_key(workspace: &Workspace, llvm_dir: &Path) -> Result<String> {
    let mut hasher = Sha256::new();

    hasher.update(b"llvm_dir:");
    hasher.update(llvm_dir.to_string_lossy().as_bytes());
    hasher.update(b"\0");

    let cmake_lists = workspace.plugin_source_dir().join("CMakeLists.txt");
    if cmake_lists.is_file() {
        hasher.update(b"CMakeLists.txt:");
        hasher.update(normalize_source(&std::fs::read(&cmake_lists)?));
        hasher.update(b"\0");
    }

    let passes_dir = workspace.passes_src_dir();
    let mut files = collect_source_files(&passes_dir)?;
    files.sort();
    for path in files {
        // Relative path keeps the key stable across checkouts
        let relative = path.strip_prefix(&passes_dir).unwrap_or(&path);
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update(b":");
        hasher.update(normalize_source(&std::fs::read(&path)?));
        hasher.update(b"\0");
    }

    Ok(hex::encode(hasher.finalize()))
}

fn collect_source_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_source_files_recursive(dir, &mut files)?;
    Ok(files)
}

fn collect_source_files_recursive(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let name = path.file_name().unwrap_or_default().to_string_lossy();

        if name.starts_with('.') || name == "build" {
            continue;
        }

        if path.is_file() {
            let is_source = path
                .extension()
                .map(|ext| SOURCE_EXTENSIONS.iter().any(|e| ext == *e))
                .unwrap_or(false);
            if is_source {
                files.push(path);
            }
        } else if path.is_dir() {
            collect_source_files_recursive(&path, files)?;
        }
    }

    Ok(())
}

/// Normalize line endings and trailing whitespace so cosmetic edits on
/// another platform do not invalidate the cache.
fn normalize_source(content: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(content);

    let normalized: String = text
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n");

    let mut result = normalized.into_bytes();
    if !result.is_empty() && result.last() != Some(&b'\n') {
        result.push(b'\n');
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::RecordingExecutor;
    use tempfile::tempdir;

    fn workspace_with_sources() -> (tempfile::TempDir, Workspace) {
        let dir = tempdir().unwrap();
        let passes = dir.path().join("src").join("passes");
        std::fs::create_dir_all(&passes).unwrap();
        std::fs::write(passes.join("StringObfPass.cpp"), "// v1\n").unwrap();
        std::fs::write(dir.path().join("CMakeLists.txt"), "project(ObfPasses)\n").unwrap();
        let ws = Workspace::new(dir.path());
        ws.ensure().unwrap();
        (dir, ws)
    }

    #[test]
    fn test_resolve_llvm_dir_priority() {
        let explicit = Path::new("/opt/llvm-17/lib/cmake/llvm");
        let env = Some(PathBuf::from("/env/llvm"));

        assert_eq!(resolve_llvm_dir(Some(explicit), env.clone()), explicit);
        assert_eq!(resolve_llvm_dir(None, env), PathBuf::from("/env/llvm"));
        assert_eq!(resolve_llvm_dir(None, None), PathBuf::from(DEFAULT_LLVM_DIR));
        assert_eq!(
            resolve_llvm_dir(None, Some(PathBuf::new())),
            PathBuf::from(DEFAULT_LLVM_DIR)
        );
    }

    #[test]
    fn test_cache_key_tracks_sources_and_toolchain() {
        let (dir, ws) = workspace_with_sources();
        let llvm = Path::new("/usr/lib/llvm-14/lib/cmake/llvm");

        let k1 = compute_cache_key(&ws, llvm).unwrap();
        assert_eq!(k1.len(), 64);
        assert_eq!(k1, compute_cache_key(&ws, llvm).unwrap());

        let other_llvm = compute_cache_key(&ws, Path::new("/opt/llvm")).unwrap();
        assert_ne!(k1, other_llvm);

        std::fs::write(
            dir.path().join("src/passes/StringObfPass.cpp"),
            "// v2\n",
        )
        .unwrap();
        assert_ne!(k1, compute_cache_key(&ws, llvm).unwrap());
    }

    #[test]
    fn test_cache_key_ignores_line_endings() {
        let (dir, ws) = workspace_with_sources();
        let llvm = Path::new("/llvm");
        let file = dir.path().join("src/passes/StringObfPass.cpp");

        std::fs::write(&file, "int x;\nint y;\n").unwrap();
        let unix = compute_cache_key(&ws, llvm).unwrap();
        std::fs::write(&file, "int x;  \r\nint y;\r\n").unwrap();
        assert_eq!(unix, compute_cache_key(&ws, llvm).unwrap());
    }

    #[test]
    fn test_cache_key_skips_non_sources() {
        let (dir, ws) = workspace_with_sources();
        let llvm = Path::new("/llvm");
        let before = compute_cache_key(&ws, llvm).unwrap();

        std::fs::write(dir.path().join("src/passes/notes.md"), "scratch").unwrap();
        assert_eq!(before, compute_cache_key(&ws, llvm).unwrap());
    }

    #[tokio::test]
    async fn test_existing_artifact_is_adopted_without_commands() {
        let (_dir, ws) = workspace_with_sources();
        std::fs::write(ws.plugin_path(), b"prebuilt").unwrap();
        let executor = Arc::new(RecordingExecutor::new());
        let builder = PluginBuilder::new(ws.clone(), executor.clone());

        let artifact = builder
            .ensure_plugin(&PluginBuildConfig::with_llvm_dir("/llvm"))
            .await
            .unwrap();

        assert_eq!(artifact.outcome, CacheOutcome::Adopted);
        assert!(artifact.exists);
        assert!(executor.calls().is_empty());
        assert!(ws.plugin_stamp_path().exists());
    }

    #[tokio::test]
    async fn test_missing_artifact_builds_once() {
        let (_dir, ws) = workspace_with_sources();
        let executor = Arc::new(RecordingExecutor::new());
        let builder = PluginBuilder::new(ws.clone(), executor.clone());
        let config = PluginBuildConfig::with_llvm_dir("/llvm");

        let first = builder.ensure_plugin(&config).await.unwrap();
        assert_eq!(first.outcome, CacheOutcome::Built);
        assert_eq!(executor.count_program("cmake"), 2);

        let calls = executor.calls();
        assert_eq!(calls[0].stage, "plugin_configure");
        assert!(calls[0].has_arg("-DLLVM_DIR=/llvm"));
        assert_eq!(calls[1].stage, "plugin_build");
        assert!(calls[1].has_arg("--build"));
        assert!(calls
            .iter()
            .all(|c| c.cwd.as_deref() == Some(ws.root())));

        let second = builder.ensure_plugin(&config).await.unwrap();
        assert_eq!(second.outcome, CacheOutcome::Hit);
        assert_eq!(executor.count_program("cmake"), 2);
    }

    #[tokio::test]
    async fn test_stale_stamp_triggers_rebuild() {
        let (dir, ws) = workspace_with_sources();
        std::fs::write(ws.plugin_path(), b"old build").unwrap();
        let config = PluginBuildConfig::with_llvm_dir("/llvm");

        let executor = Arc::new(RecordingExecutor::new());
        let first = PluginBuilder::new(ws.clone(), executor.clone())
            .ensure_plugin(&config)
            .await
            .unwrap();
        assert_eq!(first.outcome, CacheOutcome::Adopted);

        std::fs::write(dir.path().join("src/passes/StringObfPass.cpp"), "// v2\n").unwrap();

        let rebuilt = PluginBuilder::new(ws.clone(), executor.clone())
            .ensure_plugin(&config)
            .await
            .unwrap();
        assert_eq!(rebuilt.outcome, CacheOutcome::Rebuilt);
        assert_eq!(executor.count_program("cmake"), 2);

        let stamp = read_stamp(&ws.plugin_stamp_path()).unwrap();
        assert_eq!(stamp.cache_key, rebuilt.cache_key);
    }

    #[tokio::test]
    async fn test_matching_stamp_is_hit_across_builders() {
        let (_dir, ws) = workspace_with_sources();
        std::fs::write(ws.plugin_path(), b"lib").unwrap();
        let config = PluginBuildConfig::with_llvm_dir("/llvm");
        let executor = Arc::new(RecordingExecutor::new());

        PluginBuilder::new(ws.clone(), executor.clone())
            .ensure_plugin(&config)
            .await
            .unwrap();
        let again = PluginBuilder::new(ws.clone(), executor.clone())
            .ensure_plugin(&config)
            .await
            .unwrap();

        assert_eq!(again.outcome, CacheOutcome::Hit);
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_configure_failure_is_fatal_and_skips_build() {
        let (_dir, ws) = workspace_with_sources();
        let executor = Arc::new(RecordingExecutor::new());
        executor.fail_when("-DLLVM_DIR=", 1, "Could not find a package configuration file");
        let builder = PluginBuilder::new(ws.clone(), executor.clone());

        let err = builder
            .ensure_plugin(&PluginBuildConfig::with_llvm_dir("/nowhere"))
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), 1);
        assert_eq!(executor.calls().len(), 1);
        assert!(!ws.plugin_stamp_path().exists());
    }

    #[test]
    fn test_normalize_source_crlf() {
        assert_eq!(normalize_source(b"line1\r\nline2\r\n"), b"line1\nline2\n");
    }
}
