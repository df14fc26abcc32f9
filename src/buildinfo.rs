//! Machine-readable record of a compile phase.

use crate::{compile::CompileOutcome, error::Result, utils};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const FORMAT_VERSION: &str = "polybuild-phase-record-1";

/// Outcome of one source in the phase record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub file: String,
    pub project: String,
    pub reason: String,
}

/// Serialized summary of one compile phase, written next to the build
/// outputs on request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseRecord {
    #[serde(rename = "_format")]
    pub format: String,
    pub compiled: usize,
    pub up_to_date: usize,
    pub failed: Vec<FailureRecord>,
    pub duration_ms: u128,
}

impl PhaseRecord {
    pub fn new(outcome: &CompileOutcome) -> Self {
        Self {
            format: FORMAT_VERSION.to_string(),
            compiled: outcome.compiled,
            up_to_date: outcome.up_to_date,
            failed: outcome
                .bad_compilations
                .iter()
                .map(|failed| FailureRecord {
                    file: failed.file.clone(),
                    project: failed.project.clone(),
                    reason: failed.reason.clone(),
                })
                .collect(),
            duration_ms: outcome.duration.as_millis(),
        }
    }

    /// Deserializes a `PhaseRecord` from the given file.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        utils::read_json_file(path.as_ref())
    }

    /// Serializes the record as pretty JSON to the given file.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        utils::create_parent_dir_all(path)?;
        utils::write_json_file(self, path, 16 * 1024)?;
        trace!("phase record written to \"{}\"", path.display());
        Ok(())
    }
}
