//! Pass counters telemetry.
//!
//! The string pass writes a small JSON object to the path in `OFILE`:
//!
//! ```json
//! { "num_strings_encrypted": 2, "total_string_bytes": 17 }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PassCounters {
    #[serde(default)]
    pub num_strings_encrypted: u64,

    #[serde(default)]
    pub total_string_bytes: u64,
}

/// Read the counters file. Missing or malformed files yield `None`.
pub fn read_counters(path: &Path) -> Option<PassCounters> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "no pass counters");
            return None;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(counters) => Some(counters),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "malformed pass counters");
            None
        }
    }
}
