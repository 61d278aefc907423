//! External command execution.

use crate::command::{CommandOutput, CommandSpec};
use crate::error::{ObfError, Result};
use crate::obs;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Executes external commands on behalf of pipeline stages.
///
/// Implementations return `Ok` for any process that ran to completion,
/// whatever its exit status. `Err` is reserved for spawn failures and
/// timeouts.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands as child processes via `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let start = Instant::now();

        if spec.program.is_empty() {
            return Err(ObfError::EmptyCommand(spec.stage.clone()));
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|source| ObfError::Spawn {
            stage: spec.stage.clone(),
            command: spec.render(),
            source,
        })?;

        let output = if spec.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(spec.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| ObfError::Timeout {
                stage: spec.stage.clone(),
                command: spec.render(),
                secs: spec.timeout_secs,
            })??
        } else {
            child.wait_with_output().await?
        };

        Ok(CommandOutput {
            stage: spec.stage.clone(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
            success: output.status.success(),
        })
    }
}

/// Surface `spec`, run it, and turn a nonzero exit into [`ObfError::CommandFailed`].
pub async fn run_checked(executor: &dyn CommandExecutor, spec: &CommandSpec) -> Result<CommandOutput> {
    obs::emit_command(&spec.stage, &spec.render());

    let output = executor.execute(spec).await?;
    obs::emit_command_finished(&spec.stage, output.exit_code, output.duration_ms);

    if output.passed() {
        Ok(output)
    } else {
        Err(ObfError::CommandFailed {
            stage: spec.stage.clone(),
            command: spec.render(),
            exit_code: output.exit_code,
            stderr: output.stderr,
        })
    }
}
