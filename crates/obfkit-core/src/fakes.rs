//! In-memory fakes for the command layer (testing only)
//!
//! Provides `RecordingExecutor`, a `CommandExecutor` that records every
//! command instead of spawning it and answers with scripted outcomes.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::command::{CommandOutput, CommandSpec};
use crate::error::{ObfError, Result};
use crate::runner::CommandExecutor;

/// Counters payload written to `OFILE` by a simulated pass invocation.
pub const FAKE_COUNTERS_JSON: &str =
    "{\n  \"num_strings_encrypted\": 1,\n  \"total_string_bytes\": 3\n}\n";

#[derive(Debug, Clone)]
enum Outcome {
    Exit { code: i32, stderr: String },
    SpawnError,
}

#[derive(Debug, Clone)]
struct Rule {
    needle: String,
    outcome: Outcome,
}

/// Records commands and simulates their effects.
///
/// Every successful command "produces" its `-o` output: the file is written
/// with a body derived from the program, its non-path arguments, and the
/// env overlay. Commands carrying `OFILE` also write [`FAKE_COUNTERS_JSON`]
/// there, like the string pass does.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<CommandSpec>>,
    rules: Mutex<Vec<Rule>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any command whose rendering contains `needle` exits with `code`.
    pub fn fail_when(&self, needle: &str, code: i32, stderr: &str) {
        self.rules.lock().unwrap().push(Rule {
            needle: needle.to_string(),
            outcome: Outcome::Exit {
                code,
                stderr: stderr.to_string(),
            },
        });
    }

    /// Any command whose rendering contains `needle` fails to spawn.
    pub fn spawn_error_when(&self, needle: &str) {
        self.rules.lock().unwrap().push(Rule {
            needle: needle.to_string(),
            outcome: Outcome::SpawnError,
        });
    }

    /// All commands seen so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_program(&self, program: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.program == program)
            .count()
    }

    pub fn calls_for_stage(&self, stage: &str) -> Vec<CommandSpec> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.stage == stage)
            .cloned()
            .collect()
    }

    fn scripted(&self, rendered: &str) -> Option<Outcome> {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .find(|r| rendered.contains(&r.needle))
            .map(|r| r.outcome.clone())
    }

    fn simulate_outputs(spec: &CommandSpec) -> std::io::Result<()> {
        if let Some(out) = spec.output_path() {
            let mut body: Vec<String> = vec![spec.program.clone()];
            body.extend(spec.args.iter().filter(|a| !a.contains('/')).cloned());
            body.extend(
                spec.env
                    .iter()
                    .filter(|(k, _)| k.as_str() != "OFILE")
                    .map(|(k, v)| format!("{}={}", k, v)),
            );
            std::fs::write(out, body.join(" "))?;
        }
        if let Some(counters) = spec.env.get("OFILE") {
            // the string pass silently skips an unwritable OFILE
            let _ = std::fs::write(counters, FAKE_COUNTERS_JSON);
        }
        Ok(())
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        let rendered = spec.render();

        let (code, stderr) = match self.scripted(&rendered) {
            Some(Outcome::SpawnError) => {
                return Err(ObfError::Spawn {
                    stage: spec.stage.clone(),
                    command: rendered,
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted"),
                })
            }
            Some(Outcome::Exit { code, stderr }) => (code, stderr),
            None => {
                Self::simulate_outputs(spec)?;
                (0, String::new())
            }
        };

        Ok(CommandOutput {
            stage: spec.stage.clone(),
            exit_code: code,
            stdout: String::new(),
            stderr,
            duration_ms: 0,
            success: code == 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_records_and_writes_outputs() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("main.bc");
        let executor = RecordingExecutor::new();
        let spec = CommandSpec::new("compile_ir", "clang")
            .args(["-emit-llvm", "-c", "hello.c", "-o"])
            .path_arg(&out);

        let result = executor.execute(&spec).await.unwrap();

        assert!(result.passed());
        assert_eq!(executor.calls(), vec![spec]);
        assert_eq!(
            std::fs::read_to_string(&out).unwrap(),
            "clang -emit-llvm -c hello.c -o"
        );
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let executor = RecordingExecutor::new();
        executor.fail_when("-passes=", 1, "opt: Unknown command line argument");

        let spec = CommandSpec::new("passes", "opt").arg("-passes=string-obf");
        let result = executor.execute(&spec).await.unwrap();
        assert!(!result.passed());
        assert!(result.stderr.contains("Unknown command line argument"));
    }

    #[tokio::test]
    async fn test_scripted_spawn_error() {
        let executor = RecordingExecutor::new();
        executor.spawn_error_when("llc");

        let spec = CommandSpec::new("codegen", "llc");
        assert!(matches!(
            executor.execute(&spec).await,
            Err(ObfError::Spawn { .. })
        ));
        assert_eq!(executor.count_program("llc"), 1);
    }

    #[tokio::test]
    async fn test_writes_counters_when_ofile_set() {
        let dir = tempdir().unwrap();
        let counters = dir.path().join("counters.json");
        let executor = RecordingExecutor::new();
        let spec =
            CommandSpec::new("passes", "opt").env("OFILE", counters.to_string_lossy());

        executor.execute(&spec).await.unwrap();
        assert_eq!(std::fs::read_to_string(counters).unwrap(), FAKE_COUNTERS_JSON);
    }
}
