//! Build requests and their identity.

use crate::error::{ObfError, Result};
use crate::plugin::PluginBuildConfig;
use crate::preset::Preset;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// One obfuscation build: what to compile and how hard to obfuscate it.
///
/// Immutable for the duration of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildRequest {
    /// C source to compile.
    pub src: PathBuf,

    /// Obfuscation preset.
    pub preset: Preset,

    /// Seed for the passes' RNG.
    pub seed: Option<u64>,

    /// Plugin build overrides.
    pub plugin: PluginBuildConfig,
}

impl BuildRequest {
    pub fn new(src: impl Into<PathBuf>, preset: Preset) -> Self {
        Self {
            src: src.into(),
            preset,
            seed: None,
            plugin: PluginBuildConfig::default(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_plugin_config(mut self, plugin: PluginBuildConfig) -> Self {
        self.plugin = plugin;
        self
    }

    /// Digest of the inputs that determine the obfuscated output: source
    /// bytes, preset, and seed. Two requests with equal digests reproduce
    /// the same binary through the primary invocation path.
    pub fn digest(&self) -> Result<String> {
        let source =
            std::fs::read(&self.src).map_err(|_| ObfError::SourceNotFound(self.src.clone()))?;
        Ok(compute_request_digest(&source, self.preset, self.seed))
    }
}

/// Compute deterministic digest of the request inputs.
fn compute_request_digest(source: &[u8], preset: Preset, seed: Option<u64>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source);
    hasher.update(b"\0");
    for pass in preset.passes() {
        hasher.update(pass.as_bytes());
        hasher.update(b"\0");
    }
    match seed {
        Some(seed) => hasher.update(seed.to_le_bytes()),
        None => hasher.update(b"unseeded"),
    }
    hex::encode(hasher.finalize())
}
