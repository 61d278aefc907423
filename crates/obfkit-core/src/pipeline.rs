//! Pipeline orchestration.
//!
//! Stage order: workspace → plugin → IR → reference build → passes →
//! codegen/link → publish. The first failing stage aborts the run; nothing
//! already produced is removed. A missing source is rejected before the
//! plugin is touched. The baseline lands in `dist/` as soon as it is built,
//! so it survives a later failure.

use crate::backend::BackendLinker;
use crate::config::PipelineConfig;
use crate::counters::{read_counters, PassCounters};
use crate::error::{ObfError, Result};
use crate::frontend::FrontendCompiler;
use crate::obs;
use crate::passes::{InvocationEnvironment, PassOutcome, PassRunner};
use crate::plugin::{PluginArtifact, PluginBuilder};
use crate::preset;
use crate::report::{
    ReportedArtifacts, ReportedPasses, ReportedPlugin, ReportedRequest, RunReport, REPORT_FILE,
};
use crate::request::BuildRequest;
use crate::runner::CommandExecutor;
use crate::workspace::Workspace;
use chrono::Utc;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, Instrument};
use uuid::Uuid;

/// Files produced by one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineArtifacts {
    /// Request-scoped directory holding the intermediates and the report.
    pub run_dir: PathBuf,
    pub ir: PathBuf,
    pub transformed_ir: PathBuf,
    pub object: PathBuf,
    pub counters: PathBuf,
    pub baseline_exe: PathBuf,
    pub obfuscated_exe: PathBuf,
}

impl PipelineArtifacts {
    fn for_run(workspace: &Workspace, run_dir: PathBuf) -> Self {
        Self {
            ir: run_dir.join("main.bc"),
            transformed_ir: run_dir.join("main_obf.bc"),
            object: run_dir.join("main_obf.o"),
            counters: run_dir.join("counters.json"),
            baseline_exe: workspace.baseline_exe(),
            obfuscated_exe: workspace.obfuscated_exe(),
            run_dir,
        }
    }

    fn intermediates(&self) -> [&Path; 3] {
        [&self.ir, &self.transformed_ir, &self.object]
    }
}

/// Result of a complete pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub run_id: String,
    pub artifacts: PipelineArtifacts,
    pub plugin: PluginArtifact,
    pub passes: PassOutcome,
    pub counters: Option<PassCounters>,
    pub report_path: PathBuf,
    pub duration_ms: u64,
}

impl PipelineResult {
    /// Whether the legacy fallback produced the output.
    pub fn used_fallback(&self) -> bool {
        self.passes.primary_failure.is_some()
    }
}

/// Obfuscation pipeline bound to one workspace.
///
/// The plugin builder lives as long as the pipeline, so sequential runs
/// share one plugin build.
pub struct ObfPipeline {
    workspace: Workspace,
    config: PipelineConfig,
    executor: Arc<dyn CommandExecutor>,
    plugin_builder: PluginBuilder,
}

impl ObfPipeline {
    pub fn new(
        workspace: Workspace,
        config: PipelineConfig,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        let plugin_builder = PluginBuilder::new(workspace.clone(), executor.clone())
            .with_cmake(config.toolchain.cmake.clone())
            .with_timeout(config.timeout_secs);
        Self {
            workspace,
            config,
            executor,
            plugin_builder,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Run every stage for `request`.
    pub async fn run(&self, request: &BuildRequest) -> Result<PipelineResult> {
        let start = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id);

        async {
            obs::emit_pipeline_started(
                &run_id,
                &request.src.to_string_lossy(),
                request.preset.name(),
                request.seed,
            );

            let result = self.run_stages(&run_id, request, start).await;
            obs::emit_pipeline_finished(
                &run_id,
                start.elapsed().as_millis() as u64,
                result.is_ok(),
            );
            result
        }
        .instrument(span)
        .await
    }

    async fn run_stages(
        &self,
        run_id: &str,
        request: &BuildRequest,
        start: Instant,
    ) -> Result<PipelineResult> {
        let toolchain = &self.config.toolchain;
        let timeout = self.config.timeout_secs;

        stage("workspace", async {
            if !request.src.is_file() {
                return Err(ObfError::SourceNotFound(request.src.clone()));
            }
            self.workspace.ensure()
        })
        .await?;
        let run_dir = self.workspace.ensure_run_dir(run_id)?;
        let artifacts = PipelineArtifacts::for_run(&self.workspace, run_dir);
        let staged_baseline = artifacts.run_dir.join("main_orig");
        let staged_obfuscated = artifacts.run_dir.join("main_obf");

        let plugin = stage("plugin", self.plugin_builder.ensure_plugin(&request.plugin)).await?;

        let frontend = FrontendCompiler::new(self.executor.clone())
            .with_clang(toolchain.clang.clone())
            .with_timeout(timeout);
        stage("compile_ir", frontend.compile_to_ir(&request.src, &artifacts.ir)).await?;
        stage("compile_reference", async {
            frontend
                .compile_reference(&request.src, &staged_baseline)
                .await?;
            publish(&staged_baseline, &artifacts.baseline_exe)
        })
        .await?;

        let passes = preset::resolve(request.preset);
        debug!(preset = %request.preset, passes = ?passes, "resolved preset");

        let env = InvocationEnvironment::new(request.seed, &artifacts.counters);
        let runner = PassRunner::new(self.executor.clone(), plugin.path.clone())
            .with_opt(toolchain.opt.clone())
            .with_policy(self.config.fallback)
            .with_timeout(timeout);
        let pass_outcome = stage(
            "passes",
            runner.run(&artifacts.ir, &artifacts.transformed_ir, &passes, &env),
        )
        .await?;
        let counters = read_counters(&artifacts.counters);

        let backend = BackendLinker::new(self.executor.clone())
            .with_tools(toolchain.llc.clone(), toolchain.clang.clone())
            .with_timeout(timeout);
        stage(
            "codegen_link",
            backend.codegen_and_link(
                &artifacts.transformed_ir,
                self.workspace.runtime_src(),
                &artifacts.object,
                &staged_obfuscated,
            ),
        )
        .await?;

        stage("publish", async {
            publish(&staged_obfuscated, &artifacts.obfuscated_exe)
        })
        .await?;

        if self.config.clean_intermediates {
            for path in artifacts.intermediates() {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
            }
        }

        let report = RunReport {
            run_id: run_id.to_string(),
            finished_at: Utc::now(),
            request: ReportedRequest {
                src: request.src.clone(),
                preset: request.preset,
                seed: request.seed,
                digest: request.digest()?,
            },
            plugin: ReportedPlugin {
                path: plugin.path.clone(),
                cache_key: plugin.cache_key.clone(),
                outcome: plugin.outcome,
            },
            passes: ReportedPasses {
                api: pass_outcome.api,
                requested: pass_outcome.requested.clone(),
                applied: pass_outcome.applied.clone(),
                dropped: pass_outcome.dropped(),
                primary_failure: pass_outcome.primary_failure.clone(),
            },
            counters,
            artifacts: ReportedArtifacts {
                baseline: artifacts.baseline_exe.clone(),
                obfuscated: artifacts.obfuscated_exe.clone(),
                intermediates: artifacts
                    .intermediates()
                    .iter()
                    .filter(|p| p.exists())
                    .map(|p| p.to_path_buf())
                    .collect(),
            },
        };
        let report_path = artifacts.run_dir.join(REPORT_FILE);
        report.write(&report_path)?;

        info!(
            obfuscated = %artifacts.obfuscated_exe.display(),
            baseline = %artifacts.baseline_exe.display(),
            "build complete"
        );

        Ok(PipelineResult {
            run_id: run_id.to_string(),
            artifacts,
            plugin,
            passes: pass_outcome,
            counters,
            report_path,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Run one stage, bracketing it with lifecycle events.
async fn stage<T, F>(name: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let start = Instant::now();
    obs::emit_stage_started(name);
    let value = fut.await?;
    obs::emit_stage_finished(name, start.elapsed().as_millis() as u64);
    Ok(value)
}

/// Move a finished executable from the run directory into `dist/`.
fn publish(staged: &Path, dest: &Path) -> Result<()> {
    std::fs::rename(staged, dest)?;
    Ok(())
}
