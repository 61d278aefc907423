//! Structured observability hooks for pipeline runs.
//!
//! This module provides:
//! - A run-scoped tracing span via [`run_span`]
//! - Emission functions for lifecycle events: pipeline start/finish, stage
//!   start/finish, each external command, plugin cache decisions, and the
//!   pass-invocation fallback
//!
//! Events are emitted at `info!` level unless noted (filter with `RUST_LOG`).

use tracing::{debug, info, warn};

/// Span tagging every event of one run with its `run_id`.
///
/// Attach it to the run's future with `tracing::Instrument` rather than
/// entering it, since the run awaits child processes.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("obfkit.run", run_id = %run_id)
}

/// Emit event: pipeline started for a source and preset.
pub fn emit_pipeline_started(run_id: &str, src: &str, preset: &str, seed: Option<u64>) {
    info!(
        event = "pipeline.started",
        run_id = %run_id,
        src = %src,
        preset = %preset,
        seed = ?seed,
    );
}

/// Emit event: pipeline finished.
pub fn emit_pipeline_finished(run_id: &str, duration_ms: u64, success: bool) {
    info!(
        event = "pipeline.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        success = success,
    );
}

pub fn emit_stage_started(stage: &str) {
    info!(event = "stage.started", stage = %stage);
}

pub fn emit_stage_finished(stage: &str, duration_ms: u64) {
    info!(event = "stage.finished", stage = %stage, duration_ms = duration_ms);
}

/// Emit event: an external command is about to run.
///
/// # Example
///
/// ```ignore
/// emit_command("codegen", "llc -filetype=obj main_obf.bc -o main_obf.o");
/// // logs: $ llc -filetype=obj main_obf.bc -o main_obf.o
/// ```
pub fn emit_command(stage: &str, rendered: &str) {
    info!(event = "command.started", stage = %stage, "$ {}", rendered);
}

pub fn emit_command_finished(stage: &str, exit_code: i32, duration_ms: u64) {
    debug!(
        event = "command.finished",
        stage = %stage,
        exit_code = exit_code,
        duration_ms = duration_ms,
    );
}

/// Emit event: plugin cache decision (hit, adopted, built, rebuilt).
pub fn emit_plugin_cache(outcome: &str, cache_key: &str, path: &str) {
    let short = &cache_key[..12.min(cache_key.len())];
    info!(
        event = "plugin.cache",
        outcome = %outcome,
        key = %short,
        path = %path,
    );
}

/// Emit event: primary pass invocation failed and the legacy API is being tried
/// (warning level).
pub fn emit_pass_fallback(reason: &str, dropped: &[String]) {
    warn!(
        event = "passes.fallback",
        reason = %reason,
        dropped = ?dropped,
        "retrying with legacy plugin loading; only string-obf will run",
    );
}
