//! Pass invocation through the plugin.
//!
//! The primary path loads the plugin through the new pass manager
//! (`opt -load-pass-plugin <lib> -passes=a,b`). When that path fails in a
//! way the [`FallbackPolicy`] admits, the run is retried exactly once with
//! the legacy loader (`opt -load <lib> -string-obf`). The legacy retry only
//! ever runs `string-obf`; any other requested pass is dropped and reported.

use crate::command::CommandSpec;
use crate::error::{ObfError, Result};
use crate::obs;
use crate::preset::STRING_OBF;
use crate::runner::{run_checked, CommandExecutor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Env var read by the passes for their RNG seed.
pub const SEED_ENV: &str = "LLVM_OBF_SEED";

/// Env var naming the counters file the string pass writes.
pub const COUNTERS_ENV: &str = "OFILE";

/// stderr fragments (lowercased) that mean the primary plugin API is not
/// available in this `opt`, as opposed to a failure inside the passes.
const UNSUPPORTED_MARKERS: &[&str] = &[
    "unknown command line argument '-load-pass-plugin",
    "unknown command line argument '--load-pass-plugin",
    "failed to load passes from",
    "plugin entry point not found",
    "is this a legacy plugin",
    "llvmgetpassplugininfo",
];

/// Plugin invocation contract.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvocationApi {
    /// `-load-pass-plugin` with a textual `-passes=` pipeline.
    PassPlugin,
    /// `-load` with one flag per pass.
    Legacy,
}

impl std::fmt::Display for InvocationApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvocationApi::PassPlugin => f.write_str("pass-plugin"),
            InvocationApi::Legacy => f.write_str("legacy"),
        }
    }
}

/// Classification of a failed invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The invocation API itself is unavailable.
    ApiUnsupported,
    /// Anything else: pass crash, bad directive, missing binary, timeout.
    Failed,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::ApiUnsupported => f.write_str("api unsupported"),
            FailureKind::Failed => f.write_str("failed"),
        }
    }
}

/// Which primary failures are retried through the legacy API.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Only [`FailureKind::ApiUnsupported`].
    OnUnsupported,
    /// Every primary failure: missing API, malformed directive, crash.
    #[default]
    OnAnyFailure,
}

impl FallbackPolicy {
    pub fn admits(&self, kind: FailureKind) -> bool {
        match self {
            FallbackPolicy::OnUnsupported => kind == FailureKind::ApiUnsupported,
            FallbackPolicy::OnAnyFailure => true,
        }
    }
}

impl FromStr for FallbackPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "unsupported" => Ok(FallbackPolicy::OnUnsupported),
            "any" => Ok(FallbackPolicy::OnAnyFailure),
            other => Err(format!("unknown fallback policy '{other}' (expected unsupported|any)")),
        }
    }
}

/// Classify a primary-path error.
pub fn classify_failure(err: &ObfError) -> FailureKind {
    match err {
        ObfError::CommandFailed { stderr, .. } => {
            let lower = stderr.to_ascii_lowercase();
            if UNSUPPORTED_MARKERS
                .iter()
                .any(|m| lower.contains(m))
            {
                FailureKind::ApiUnsupported
            } else {
                FailureKind::Failed
            }
        }
        _ => FailureKind::Failed,
    }
}

/// Environment handed to one pass-invocation subprocess.
///
/// Applied as a per-command overlay; never written to the driver's own
/// environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvocationEnvironment {
    /// RNG seed for the passes. `None` lets the plugin pick its own.
    pub seed: Option<u64>,

    /// Where the string pass writes its counters.
    pub counters_path: PathBuf,
}

impl InvocationEnvironment {
    /// A seed of 0 means "no seed", matching the plugin's own convention.
    pub fn new(seed: Option<u64>, counters_path: impl Into<PathBuf>) -> Self {
        Self {
            seed: seed.filter(|s| *s != 0),
            counters_path: counters_path.into(),
        }
    }

    pub fn vars(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        if let Some(seed) = self.seed {
            vars.insert(SEED_ENV.to_string(), seed.to_string());
        }
        vars.insert(
            COUNTERS_ENV.to_string(),
            self.counters_path.to_string_lossy().into_owned(),
        );
        vars
    }
}

/// Result of running the pass pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PassOutcome {
    /// Transformed IR.
    pub output: PathBuf,

    /// API that produced `output`.
    pub api: InvocationApi,

    /// Passes the preset asked for.
    pub requested: Vec<String>,

    /// Passes that actually ran.
    pub applied: Vec<String>,

    /// Primary-path error text when the fallback was taken.
    pub primary_failure: Option<String>,
}

impl PassOutcome {
    /// Requested passes that did not run.
    pub fn dropped(&self) -> Vec<String> {
        self.requested
            .iter()
            .filter(|p| !self.applied.contains(p))
            .cloned()
            .collect()
    }
}

/// Applies a pass list to an IR file through the plugin.
pub struct PassRunner {
    executor: Arc<dyn CommandExecutor>,
    opt: String,
    plugin: PathBuf,
    policy: FallbackPolicy,
    timeout_secs: u64,
}

impl PassRunner {
    pub fn new(executor: Arc<dyn CommandExecutor>, plugin: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            opt: "opt".to_string(),
            plugin: plugin.into(),
            policy: FallbackPolicy::default(),
            timeout_secs: 0,
        }
    }

    pub fn with_opt(mut self, opt: impl Into<String>) -> Self {
        self.opt = opt.into();
        self
    }

    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Command for the primary (new pass manager) path.
    pub fn primary_command(
        &self,
        input: &Path,
        output: &Path,
        passes: &[String],
        env: &InvocationEnvironment,
    ) -> CommandSpec {
        CommandSpec::new("passes", &self.opt)
            .arg("-load-pass-plugin")
            .path_arg(&self.plugin)
            .arg(format!("-passes={}", passes.join(",")))
            .path_arg(input)
            .arg("-o")
            .path_arg(output)
            .envs(&env.vars())
            .timeout(self.timeout_secs)
    }

    /// Command for the legacy loader; always the single `string-obf` pass.
    pub fn legacy_command(
        &self,
        input: &Path,
        output: &Path,
        env: &InvocationEnvironment,
    ) -> CommandSpec {
        CommandSpec::new("passes_legacy", &self.opt)
            .arg("-load")
            .path_arg(&self.plugin)
            .arg(format!("-{}", STRING_OBF))
            .path_arg(input)
            .arg("-o")
            .path_arg(output)
            .envs(&env.vars())
            .timeout(self.timeout_secs)
    }

    /// Run `passes` over `input`, writing `output`.
    pub async fn run(
        &self,
        input: &Path,
        output: &Path,
        passes: &[String],
        env: &InvocationEnvironment,
    ) -> Result<PassOutcome> {
        let primary = self.primary_command(input, output, passes, env);
        let err = match run_checked(self.executor.as_ref(), &primary).await {
            Ok(_) => {
                return Ok(PassOutcome {
                    output: output.to_path_buf(),
                    api: InvocationApi::PassPlugin,
                    requested: passes.to_vec(),
                    applied: passes.to_vec(),
                    primary_failure: None,
                })
            }
            Err(err) => err,
        };

        let kind = classify_failure(&err);
        if !self.policy.admits(kind) {
            return Err(ObfError::PassInvocation {
                api: InvocationApi::PassPlugin,
                kind,
                source: Box::new(err),
            });
        }

        let applied = vec![STRING_OBF.to_string()];
        let dropped: Vec<String> = passes
            .iter()
            .filter(|p| !applied.contains(p))
            .cloned()
            .collect();
        obs::emit_pass_fallback(&err.to_string(), &dropped);

        let legacy = self.legacy_command(input, output, env);
        run_checked(self.executor.as_ref(), &legacy)
            .await
            .map_err(|e| ObfError::PassInvocation {
                api: InvocationApi::Legacy,
                kind: classify_failure(&e),
                source: Box::new(e),
            })?;
        info!(api = %InvocationApi::Legacy, "legacy pass invocation succeeded");

        Ok(PassOutcome {
            output: output.to_path_buf(),
            api: InvocationApi::Legacy,
            requested: passes.to_vec(),
            applied,
            primary_failure: Some(err.to_string()),
        })
    }
}
