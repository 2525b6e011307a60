//! What to do to one resolved variable, and where the result goes.

use std::path::{Path, PathBuf};

use mdtf_foundation::Frequency;
use mdtf_settings::CaseConfig;
use sha2::{Digest, Sha256};

use crate::varlist::ResolvedVariable;

/// Length of the hex digest inserted into transformed output names.
const DIGEST_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessPlan {
    pub case: String,
    /// In-file name the POD expects
    pub var_name: String,
    /// Variable name inside the input files
    pub source_name: String,
    pub frequency: Frequency,
    /// Input chunks in time order
    pub inputs: Vec<PathBuf>,
    pub first_year: i32,
    pub last_year: i32,
    /// Pressure level in hPa
    pub level: Option<f64>,
    pub units: Option<String>,
}

impl PreprocessPlan {
    /// Plan for an available variable; `None` when nothing was selected.
    pub fn for_variable(case: &CaseConfig, resolved: &ResolvedVariable) -> Option<Self> {
        let selected = resolved.selected.as_ref()?;
        let first = resolved.rows.first()?;
        Some(Self {
            case: case.name.clone(),
            var_name: resolved.entry.var_name.clone(),
            source_name: first.variable_id.clone(),
            frequency: selected.freq,
            inputs: resolved.rows.iter().map(|r| r.path.clone()).collect(),
            first_year: case.first_year,
            last_year: case.last_year,
            level: selected.level.or(resolved.entry.level),
            units: resolved.entry.units.clone().or_else(|| selected.units.clone()),
        })
    }

    /// True when the output differs from a plain concatenate-and-crop of
    /// the source variable.
    pub fn transforms(&self) -> bool {
        self.level.is_some() || self.units.is_some() || self.source_name != self.var_name
    }

    /// Short hex digest of the transform parameters.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source_name.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.var_name.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.frequency.as_str().as_bytes());
        hasher.update([0u8]);
        if let Some(level) = self.level {
            hasher.update(level.to_bits().to_le_bytes());
        }
        hasher.update([0u8]);
        if let Some(units) = &self.units {
            hasher.update(units.as_bytes());
        }
        let hex: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        hex[..DIGEST_LEN].to_string()
    }

    /// Directory holding every preprocessed file of the case.
    pub fn inputs_dir(work_dir: &Path, case: &str) -> PathBuf {
        work_dir.join(case).join("inputs")
    }

    /// `<WORK_DIR>/<case>/inputs/<freq>/<case>.<name>.<freq>[.<digest>].nc`
    pub fn output_path(&self, work_dir: &Path) -> PathBuf {
        let mut file = format!("{}.{}.{}", self.case, self.var_name, self.frequency);
        if self.transforms() {
            file.push('.');
            file.push_str(&self.digest());
        }
        file.push_str(".nc");
        Self::inputs_dir(work_dir, &self.case)
            .join(self.frequency.as_str())
            .join(file)
    }
}
