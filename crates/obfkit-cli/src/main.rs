//! obfkit - LLVM obfuscation pipeline driver
//!
//! The `obfkit` command compiles one C source twice: once straight through
//! `clang` as a baseline, and once through the obfuscation pass plugin.
//!
//! ## Outputs
//!
//! - `dist/main_orig`: baseline executable
//! - `dist/main_obf`: obfuscated executable
//! - `build/runs/<run-id>/run_report.json`: what ran and what it produced

use anyhow::{Context, Result};
use clap::Parser;
use obfkit_core::{
    BuildRequest, FallbackPolicy, ObfError, ObfPipeline, PipelineConfig, PipelineResult,
    PluginBuildConfig, Preset, ProcessExecutor, Workspace,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, Level};

#[derive(Parser, Debug)]
#[command(name = "obfkit")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build baseline and obfuscated executables from a C source", long_about = None)]
struct Cli {
    /// C source to compile (default: <root>/tests/hello.c)
    #[arg(long)]
    src: Option<PathBuf>,

    /// Obfuscation preset: light or balanced
    #[arg(long, default_value = "balanced")]
    preset: Preset,

    /// Seed for the passes' RNG (0 leaves it unset)
    #[arg(long)]
    seed: Option<u64>,

    /// LLVM CMake package directory (default: $LLVM_DIR, then the llvm-14 location)
    #[arg(long)]
    llvm_dir: Option<PathBuf>,

    /// Project root holding CMakeLists.txt, src/passes and src/runtime
    #[arg(long, env = "OBFKIT_ROOT", default_value = ".")]
    root: PathBuf,

    /// Which primary pass failures fall back to legacy loading: any or unsupported
    #[arg(long, default_value = "any")]
    fallback: FallbackPolicy,

    /// Per-command timeout in seconds (0 = none)
    #[arg(long, default_value_t = 0)]
    timeout_secs: u64,

    /// Remove IR and object files after a successful run
    #[arg(long)]
    clean_intermediates: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn workspace(&self) -> Workspace {
        Workspace::new(&self.root)
    }

    fn request(&self, workspace: &Workspace) -> BuildRequest {
        let src = self
            .src
            .clone()
            .unwrap_or_else(|| workspace.default_source());
        let mut request = BuildRequest::new(src, self.preset);
        if let Some(seed) = self.seed {
            request = request.with_seed(seed);
        }
        if let Some(dir) = &self.llvm_dir {
            request = request.with_plugin_config(PluginBuildConfig::with_llvm_dir(dir));
        }
        request
    }

    fn config(&self) -> PipelineConfig {
        PipelineConfig::default()
            .with_fallback(self.fallback)
            .with_timeout(self.timeout_secs)
            .cleaning_intermediates(self.clean_intermediates)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    obfkit_core::init_tracing(cli.json, level);

    match cmd_build(&cli).await {
        Ok(result) => print_summary(&result),
        Err(err) => {
            report_failure(&err);
            std::process::exit(exit_code(&err));
        }
    }
}

async fn cmd_build(cli: &Cli) -> Result<PipelineResult> {
    let workspace = cli.workspace();
    let request = cli.request(&workspace);
    let pipeline = ObfPipeline::new(workspace, cli.config(), Arc::new(ProcessExecutor::new()));

    pipeline
        .run(&request)
        .await
        .with_context(|| format!("obfuscation build of {} failed", request.src.display()))
}

fn print_summary(result: &PipelineResult) {
    println!("Built: {}", result.artifacts.obfuscated_exe.display());
    println!("Baseline: {}", result.artifacts.baseline_exe.display());
    if result.used_fallback() {
        println!(
            "Passes: {} (legacy loader; dropped: {})",
            result.passes.applied.join(","),
            result.passes.dropped().join(",")
        );
    } else {
        println!("Passes: {}", result.passes.applied.join(","));
    }
    if let Some(counters) = &result.counters {
        println!(
            "Strings encrypted: {} ({} bytes)",
            counters.num_strings_encrypted, counters.total_string_bytes
        );
    }
    println!("Report: {}", result.report_path.display());
}

fn report_failure(err: &anyhow::Error) {
    error!(error = %err, "build failed");
    eprintln!("error: {:#}", err);
    if let Some(obf) = err.downcast_ref::<ObfError>() {
        if let Some(command) = obf.failing_command() {
            eprintln!("failing command: {}", command);
        }
        if let Some(stderr) = command_stderr(obf) {
            eprintln!("{}", stderr.trim_end());
        }
    }
}

/// Captured stderr of the failing tool, if it produced any.
fn command_stderr(err: &ObfError) -> Option<&str> {
    match err {
        ObfError::CommandFailed { stderr, .. } if !stderr.trim().is_empty() => Some(stderr),
        ObfError::PassInvocation { source, .. } => command_stderr(source),
        _ => None,
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<ObfError>()
        .map(ObfError::exit_code)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use obfkit_core::{FailureKind, InvocationApi};

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["obfkit"]).unwrap();
        assert_eq!(cli.preset, Preset::Balanced);
        assert_eq!(cli.fallback, FallbackPolicy::OnAnyFailure);
        assert_eq!(cli.seed, None);
        assert!(!cli.clean_intermediates);

        let ws = cli.workspace();
        let request = cli.request(&ws);
        assert_eq!(request.src, PathBuf::from("./tests/hello.c"));
        assert_eq!(request.plugin.llvm_dir, None);
    }

    #[test]
    fn test_full_invocation() {
        let cli = Cli::try_parse_from([
            "obfkit",
            "--src",
            "tests/hello.c",
            "--preset",
            "light",
            "--seed",
            "42",
            "--llvm-dir",
            "/opt/llvm/lib/cmake/llvm",
            "--fallback",
            "unsupported",
            "--timeout-secs",
            "120",
            "--clean-intermediates",
        ])
        .unwrap();

        let request = cli.request(&cli.workspace());
        assert_eq!(request.src, PathBuf::from("tests/hello.c"));
        assert_eq!(request.preset, Preset::Light);
        assert_eq!(request.seed, Some(42));
        assert_eq!(
            request.plugin.llvm_dir,
            Some(PathBuf::from("/opt/llvm/lib/cmake/llvm"))
        );

        let config = cli.config();
        assert_eq!(config.fallback, FallbackPolicy::OnUnsupported);
        assert_eq!(config.timeout_secs, 120);
        assert!(config.clean_intermediates);
    }

    #[test]
    fn test_rejects_unknown_preset() {
        assert!(Cli::try_parse_from(["obfkit", "--preset", "paranoid"]).is_err());
        assert!(Cli::try_parse_from(["obfkit", "--seed", "-1"]).is_err());
        assert!(Cli::try_parse_from(["obfkit", "--fallback", "never"]).is_err());
    }

    #[test]
    fn test_exit_code_follows_failing_command() {
        let inner = ObfError::CommandFailed {
            stage: "passes".to_string(),
            command: "opt -load-pass-plugin build/libObfPasses.so".to_string(),
            exit_code: 134,
            stderr: "Assertion failed\n".to_string(),
        };
        let err = ObfError::PassInvocation {
            api: InvocationApi::PassPlugin,
            kind: FailureKind::Failed,
            source: Box::new(inner),
        };
        assert_eq!(command_stderr(&err), Some("Assertion failed\n"));

        let wrapped = anyhow::Error::new(err).context("obfuscation build failed");
        assert_eq!(exit_code(&wrapped), 134);
        assert_eq!(exit_code(&anyhow::anyhow!("no tool")), 1);
    }

    #[tokio::test]
    async fn test_missing_source_fails_before_any_tool() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().into_owned();
        let cli = Cli::try_parse_from(["obfkit", "--root", root.as_str()]).unwrap();

        let err = cmd_build(&cli).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ObfError>(),
            Some(ObfError::SourceNotFound(_))
        ));
        assert_eq!(exit_code(&err), 1);
    }
}
