//! Per-POD, per-case run records.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use mdtf_data::{Resolution, VarStatus};
use mdtf_foundation::Reason;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};

pub const RECORDS_FILE: &str = "run_records.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    SkippedMissingData,
    /// The POD's interpreter environment was not found.
    SkippedEnvironment,
    Running,
    Succeeded,
    Failed,
    /// Terminated after an interrupt, or never started because of one.
    Cancelled,
}

impl RunStatus {
    pub fn is_skipped(self) -> bool {
        matches!(self, RunStatus::SkippedMissingData | RunStatus::SkippedEnvironment)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::SkippedMissingData => "skipped-missing-data",
            RunStatus::SkippedEnvironment => "skipped-environment",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one varlist entry was satisfied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSummary {
    pub name: String,
    pub status: VarStatus,
    /// `name@freq` steps tried, first to last.
    pub chain: Vec<String>,
    /// Preprocessed file handed to the POD.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub pod: String,
    pub case: String,
    pub status: RunStatus,
    pub exit_code: Option<i32>,
    pub log_path: Option<PathBuf>,
    /// Relative to the POD's output directory.
    pub figures: Vec<PathBuf>,
    pub started: Option<DateTime<Local>>,
    pub finished: Option<DateTime<Local>>,
    pub reason: Option<Reason>,
    #[serde(default)]
    pub variables: Vec<VariableSummary>,
}

impl RunRecord {
    pub fn new(pod: &str, case: &str, status: RunStatus) -> Self {
        Self {
            pod: pod.to_string(),
            case: case.to_string(),
            status,
            exit_code: None,
            log_path: None,
            figures: Vec::new(),
            started: None,
            finished: None,
            reason: None,
            variables: Vec::new(),
        }
    }

    /// A POD that never ran; `status` must be one of the non-running states.
    pub fn not_run(pod: &str, case: &str, status: RunStatus, reason: Reason) -> Self {
        let mut record = Self::new(pod, case, status);
        record.reason = Some(reason);
        record
    }

    pub fn with_variables(mut self, resolution: &Resolution) -> Self {
        self.variables = resolution
            .variables
            .iter()
            .map(|v| VariableSummary {
                name: v.entry.var_name.clone(),
                status: v.status,
                chain: v.chain.clone(),
                file: None,
            })
            .collect();
        self
    }

    pub fn set_file(&mut self, var_name: &str, file: &Path) {
        if let Some(summary) = self.variables.iter_mut().find(|v| v.name == var_name) {
            summary.file = Some(file.to_path_buf());
        }
    }
}

pub fn write_records(path: &Path, records: &[RunRecord]) -> Result<()> {
    let text = serde_json::to_string_pretty(records).map_err(|source| RuntimeError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text + "\n").map_err(|e| RuntimeError::io(path, e))
}

pub fn read_records(path: &Path) -> Result<Vec<RunRecord>> {
    let text = fs::read_to_string(path).map_err(|e| RuntimeError::io(path, e))?;
    serde_json::from_str(&text).map_err(|source| RuntimeError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdtf_foundation::ErrorKind;

    #[test]
    fn records_round_trip_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RECORDS_FILE);
        let mut ok = RunRecord::new("example", "CM4_hist", RunStatus::Succeeded);
        ok.exit_code = Some(0);
        ok.started = Some(Local::now());
        ok.figures.push(PathBuf::from("model/PS/example.eps"));
        let skipped = RunRecord::not_run(
            "blocking",
            "CM4_hist",
            RunStatus::SkippedMissingData,
            Reason::new(ErrorKind::VarlistUnresolved, "required variable 'zg500' not found"),
        );

        write_records(&path, &[ok.clone(), skipped.clone()]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"skipped-missing-data\""));
        assert!(text.contains("\"E004\""));
        assert_eq!(read_records(&path).unwrap(), vec![ok, skipped]);
    }
}
