//! Source → IR lowering and the baseline reference build.

use crate::command::CommandSpec;
use crate::error::{ObfError, Result};
use crate::runner::{run_checked, CommandExecutor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Drives the C frontend (`clang`).
pub struct FrontendCompiler {
    executor: Arc<dyn CommandExecutor>,
    clang: String,
    timeout_secs: u64,
}

impl FrontendCompiler {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            clang: "clang".to_string(),
            timeout_secs: 0,
        }
    }

    pub fn with_clang(mut self, clang: impl Into<String>) -> Self {
        self.clang = clang.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Emit unoptimized bitcode for `source` at `out`.
    pub async fn compile_to_ir(&self, source: &Path, out: &Path) -> Result<PathBuf> {
        ensure_source(source)?;
        let spec = CommandSpec::new("compile_ir", &self.clang)
            .args(["-emit-llvm", "-c"])
            .path_arg(source)
            .arg("-o")
            .path_arg(out)
            .timeout(self.timeout_secs);
        run_checked(self.executor.as_ref(), &spec).await?;
        Ok(out.to_path_buf())
    }

    /// Compile and link `source` unmodified, as a control to diff against.
    pub async fn compile_reference(&self, source: &Path, out: &Path) -> Result<PathBuf> {
        ensure_source(source)?;
        let spec = CommandSpec::new("compile_reference", &self.clang)
            .path_arg(source)
            .arg("-o")
            .path_arg(out)
            .timeout(self.timeout_secs);
        run_checked(self.executor.as_ref(), &spec).await?;
        Ok(out.to_path_buf())
    }
}

fn ensure_source(source: &Path) -> Result<()> {
    if source.is_file() {
        Ok(())
    } else {
        Err(ObfError::SourceNotFound(source.to_path_buf()))
    }
}
