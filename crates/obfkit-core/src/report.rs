//! Per-run JSON report written next to the run's intermediates.

use crate::counters::PassCounters;
use crate::error::Result;
use crate::passes::InvocationApi;
use crate::plugin::CacheOutcome;
use crate::preset::Preset;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the report inside a run directory.
pub const REPORT_FILE: &str = "run_report.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: String,
    pub finished_at: DateTime<Utc>,
    pub request: ReportedRequest,
    pub plugin: ReportedPlugin,
    pub passes: ReportedPasses,
    pub counters: Option<PassCounters>,
    pub artifacts: ReportedArtifacts,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportedRequest {
    pub src: PathBuf,
    pub preset: Preset,
    pub seed: Option<u64>,
    pub digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportedPlugin {
    pub path: PathBuf,
    pub cache_key: String,
    pub outcome: CacheOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportedPasses {
    pub api: InvocationApi,
    pub requested: Vec<String>,
    pub applied: Vec<String>,
    pub dropped: Vec<String>,
    pub primary_failure: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportedArtifacts {
    pub baseline: PathBuf,
    pub obfuscated: PathBuf,
    /// Intermediates still on disk (empty when cleaned).
    pub intermediates: Vec<PathBuf>,
}

impl RunReport {
    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        Ok(serde_json::from_slice(&std::fs::read(path)?)?)
    }
}
