//! IR → object → executable.

use crate::command::CommandSpec;
use crate::error::{ObfError, Result};
use crate::runner::{run_checked, CommandExecutor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Lowers transformed IR with `llc` and links it against the runtime
/// support module with `clang`.
pub struct BackendLinker {
    executor: Arc<dyn CommandExecutor>,
    llc: String,
    clang: String,
    timeout_secs: u64,
}

impl BackendLinker {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            llc: "llc".to_string(),
            clang: "clang".to_string(),
            timeout_secs: 0,
        }
    }

    pub fn with_tools(mut self, llc: impl Into<String>, clang: impl Into<String>) -> Self {
        self.llc = llc.into();
        self.clang = clang.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Produce `out` from `ir`, leaving the object file at `obj`.
    pub async fn codegen_and_link(
        &self,
        ir: &Path,
        runtime_support: &Path,
        obj: &Path,
        out: &Path,
    ) -> Result<PathBuf> {
        if !runtime_support.is_file() {
            return Err(ObfError::RuntimeSupportMissing(runtime_support.to_path_buf()));
        }

        let codegen = CommandSpec::new("codegen", &self.llc)
            .arg("-filetype=obj")
            .path_arg(ir)
            .arg("-o")
            .path_arg(obj)
            .timeout(self.timeout_secs);
        run_checked(self.executor.as_ref(), &codegen).await?;

        let link = CommandSpec::new("link", &self.clang)
            .path_arg(obj)
            .path_arg(runtime_support)
            .arg("-o")
            .path_arg(out)
            .timeout(self.timeout_secs);
        run_checked(self.executor.as_ref(), &link).await?;

        Ok(out.to_path_buf())
    }
}
