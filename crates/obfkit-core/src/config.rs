//! Pipeline configuration.

use crate::passes::FallbackPolicy;
use serde::{Deserialize, Serialize};

/// External tool names. Each is resolved through `PATH` unless absolute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Toolchain {
    pub clang: String,
    pub opt: String,
    pub llc: String,
    pub cmake: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            clang: "clang".to_string(),
            opt: "opt".to_string(),
            llc: "llc".to_string(),
            cmake: "cmake".to_string(),
        }
    }
}

/// Settings shared by every run of one pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    pub toolchain: Toolchain,

    /// Which primary pass-invocation failures fall back to the legacy API.
    pub fallback: FallbackPolicy,

    /// Per-command timeout in seconds (0 = none).
    pub timeout_secs: u64,

    /// Remove IR and object files of a successful run.
    pub clean_intermediates: bool,
}

impl PipelineConfig {
    pub fn with_toolchain(mut self, toolchain: Toolchain) -> Self {
        self.toolchain = toolchain;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn cleaning_intermediates(mut self, clean: bool) -> Self {
        self.clean_intermediates = clean;
        self
    }
}
