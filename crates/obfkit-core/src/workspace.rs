//! Workspace layout: root, build and dist locations and the paths derived
//! from them.
//!
//! Layout:
//! - `<root>/build/libObfPasses.<so|dylib|dll>`: plugin artifact
//! - `<root>/build/plugin.stamp.json`: cache key the plugin was built under
//! - `<root>/build/runs/<run_id>/`: intermediates of one run
//! - `<root>/dist/main_orig`, `<root>/dist/main_obf`: final executables
//! - `<root>/src/runtime/decryptor.c`: runtime support module
//! - `<root>/src/passes/`: plugin sources (built with `<root>/CMakeLists.txt`)

use crate::error::{ObfError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Plugin library file name for the current target platform.
pub fn plugin_file_name() -> &'static str {
    if cfg!(target_os = "macos") {
        "libObfPasses.dylib"
    } else if cfg!(target_os = "windows") {
        "libObfPasses.dll"
    } else {
        "libObfPasses.so"
    }
}

/// Resolved workspace paths. All paths are fixed per workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Workspace {
    root: PathBuf,
    build_dir: PathBuf,
    dist_dir: PathBuf,
    plugin_path: PathBuf,
    runtime_src: PathBuf,
}

impl Workspace {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let build_dir = root.join("build");
        let dist_dir = root.join("dist");
        Self {
            plugin_path: build_dir.join(plugin_file_name()),
            runtime_src: root.join("src").join("runtime").join("decryptor.c"),
            root,
            build_dir,
            dist_dir,
        }
    }

    /// Create `build/` and `dist/` if missing. No-op when both exist.
    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.build_dir, &self.dist_dir] {
            std::fs::create_dir_all(dir).map_err(|source| ObfError::WorkspaceSetup {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Create and return the request-scoped directory for `run_id`.
    pub fn ensure_run_dir(&self, run_id: &str) -> Result<PathBuf> {
        let dir = self.run_dir(run_id);
        std::fs::create_dir_all(&dir).map_err(|source| ObfError::WorkspaceSetup {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn dist_dir(&self) -> &Path {
        &self.dist_dir
    }

    pub fn plugin_path(&self) -> &Path {
        &self.plugin_path
    }

    pub fn runtime_src(&self) -> &Path {
        &self.runtime_src
    }

    /// Root of the plugin's own source tree (where its `CMakeLists.txt` lives).
    pub fn plugin_source_dir(&self) -> &Path {
        &self.root
    }

    /// Directory holding the pass sources that feed the plugin cache key.
    pub fn passes_src_dir(&self) -> PathBuf {
        self.root.join("src").join("passes")
    }

    pub fn plugin_stamp_path(&self) -> PathBuf {
        self.build_dir.join("plugin.stamp.json")
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.build_dir.join("runs").join(run_id)
    }

    /// Source compiled when a request does not name one.
    pub fn default_source(&self) -> PathBuf {
        self.root.join("tests").join("hello.c")
    }

    pub fn baseline_exe(&self) -> PathBuf {
        self.dist_dir.join("main_orig")
    }

    pub fn obfuscated_exe(&self) -> PathBuf {
        self.dist_dir.join("main_obf")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_derived_paths() {
        let ws = Workspace::new("/work/obf");
        assert_eq!(ws.build_dir(), Path::new("/work/obf/build"));
        assert_eq!(ws.dist_dir(), Path::new("/work/obf/dist"));
        assert_eq!(
            ws.runtime_src(),
            Path::new("/work/obf/src/runtime/decryptor.c")
        );
        assert_eq!(ws.plugin_path().parent(), Some(Path::new("/work/obf/build")));
        assert_eq!(ws.obfuscated_exe(), PathBuf::from("/work/obf/dist/main_obf"));
        assert_eq!(ws.baseline_exe(), PathBuf::from("/work/obf/dist/main_orig"));
        assert_eq!(ws.run_dir("r1"), PathBuf::from("/work/obf/build/runs/r1"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_plugin_suffix_linux() {
        assert_eq!(plugin_file_name(), "libObfPasses.so");
    }

    #[test]
    fn test_ensure_creates_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let ws = Workspace::new(dir.path());

        ws.ensure().unwrap();
        assert!(ws.build_dir().is_dir());
        assert!(ws.dist_dir().is_dir());

        std::fs::write(ws.build_dir().join("keep.txt"), b"x").unwrap();
        ws.ensure().unwrap();
        assert!(ws.build_dir().join("keep.txt").exists());
    }

    #[test]
    fn test_ensure_fails_when_root_is_a_file() {
        let dir = tempdir().unwrap();
        let file_root = dir.path().join("not-a-dir");
        std::fs::write(&file_root, b"").unwrap();

        let err = Workspace::new(&file_root).ensure().unwrap_err();
        assert!(matches!(err, ObfError::WorkspaceSetup { .. }));
    }

    #[test]
    fn test_run_dirs_are_distinct() {
        let dir = tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        ws.ensure().unwrap();

        let a = ws.ensure_run_dir("a").unwrap();
        let b = ws.ensure_run_dir("b").unwrap();
        assert_ne!(a, b);
        assert!(a.is_dir() && b.is_dir());
    }
}
