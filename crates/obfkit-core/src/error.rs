//! Error types for obfkit pipelines

use std::path::PathBuf;

use thiserror::Error;

use crate::passes::{FailureKind, InvocationApi};

/// Errors that can occur while driving an obfuscation build
#[derive(Error, Debug)]
pub enum ObfError {
    /// Build or dist directory could not be created
    #[error("failed to prepare workspace directory {path:?}: {source}")]
    WorkspaceSetup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// External tool exited with a nonzero status
    #[error("{stage}: command `{command}` exited with code {exit_code}")]
    CommandFailed {
        stage: String,
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// External tool could not be started
    #[error("{stage}: failed to spawn `{command}`: {source}")]
    Spawn {
        stage: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// External tool ran past its configured timeout
    #[error("{stage}: command `{command}` timed out after {secs} seconds")]
    Timeout {
        stage: String,
        command: String,
        secs: u64,
    },

    /// Pass invocation failed and no further recovery applies
    #[error("pass invocation via {api} failed ({kind}): {source}")]
    PassInvocation {
        api: InvocationApi,
        kind: FailureKind,
        #[source]
        source: Box<ObfError>,
    },

    /// Preset name outside the closed set
    #[error("unknown preset '{0}' (expected one of: light, balanced)")]
    UnknownPreset(String),

    /// Source file handed to the frontend does not exist
    #[error("source file not found: {0:?}")]
    SourceNotFound(PathBuf),

    /// Runtime support module missing at its fixed location
    #[error("runtime support source not found: {0:?}")]
    RuntimeSupportMissing(PathBuf),

    /// Command spec with nothing to run
    #[error("{0}: empty command")]
    EmptyCommand(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ObfError {
    /// Process exit status to report for this error.
    ///
    /// Mirrors the failing external command where there is one, otherwise 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            ObfError::CommandFailed { exit_code, .. } if *exit_code > 0 => *exit_code,
            ObfError::PassInvocation { source, .. } => source.exit_code(),
            _ => 1,
        }
    }

    /// Rendered command line of the failing external tool, if any.
    pub fn failing_command(&self) -> Option<&str> {
        match self {
            ObfError::CommandFailed { command, .. }
            | ObfError::Spawn { command, .. }
            | ObfError::Timeout { command, .. } => Some(command),
            ObfError::PassInvocation { source, .. } => source.failing_command(),
            _ => None,
        }
    }
}

/// Result type for obfkit operations
pub type Result<T> = std::result::Result<T, ObfError>;
