//! obfkit core - LLVM obfuscation pipeline driver
//!
//! Given a C source file, produces:
//! - a baseline executable compiled straight from the source
//! - an obfuscated executable whose IR was rewritten by a pass plugin
//!
//! Stages run sequentially and stop at the first failure. External tools
//! (`clang`, `opt`, `llc`, `cmake`) are black boxes reached through the
//! [`CommandExecutor`] seam.

pub mod backend;
pub mod command;
pub mod config;
pub mod counters;
pub mod error;
pub mod fakes;
pub mod frontend;
pub mod obs;
pub mod passes;
pub mod pipeline;
pub mod plugin;
pub mod preset;
pub mod report;
pub mod request;
pub mod runner;
pub mod telemetry;
pub mod workspace;

// Re-export key types
pub use backend::BackendLinker;
pub use command::{CommandOutput, CommandSpec};
pub use config::{PipelineConfig, Toolchain};
pub use counters::{read_counters, PassCounters};
pub use error::{ObfError, Result};
pub use frontend::FrontendCompiler;
pub use passes::{
    classify_failure, FailureKind, FallbackPolicy, InvocationApi, InvocationEnvironment,
    PassOutcome, PassRunner,
};
pub use pipeline::{ObfPipeline, PipelineArtifacts, PipelineResult};
pub use plugin::{CacheOutcome, PluginArtifact, PluginBuildConfig, PluginBuilder};
pub use preset::{resolve, Preset};
pub use report::RunReport;
pub use request::BuildRequest;
pub use runner::{run_checked, CommandExecutor, ProcessExecutor};
pub use telemetry::init_tracing;
pub use workspace::Workspace;

/// obfkit version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
