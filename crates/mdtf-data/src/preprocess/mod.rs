//! Per-variable preprocessing.
//!
//! A plan turns the selected catalog rows of one varlist entry into exactly
//! one file under the work directory. Steps run only when needed, in this
//! order: concatenate chunks, crop to the case years, extract a pressure
//! level, rename to the POD's name, convert units. Inputs are never
//! modified; the output of an already-preprocessed file is equal to it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mdtf_foundation::{CalendarError, ErrorKind, UnitError};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::dataset::Dataset;
use crate::store::{DatasetStore, StoreError};

pub mod concat;
pub mod convert;
pub mod crop;
pub mod level;
pub mod lock;
pub mod plan;

pub use lock::FileLock;
pub use plan::PreprocessPlan;

pub type Result<T> = std::result::Result<T, PreprocessError>;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{var}: non-monotonic/overlapping time axis ({detail})")]
    TimeAxis { var: String, detail: String },

    #[error("{var}: chunks do not share a grid ({detail})")]
    Shape { var: String, detail: String },

    #[error("{var}: {source}")]
    Calendar {
        var: String,
        #[source]
        source: CalendarError,
    },

    #[error("{var}: data covers {have}, case needs {first}-{last}")]
    Coverage {
        var: String,
        have: String,
        first: i32,
        last: i32,
    },

    #[error("{var}: {message}")]
    Level { var: String, message: String },

    #[error("{var}: cannot convert units: {source}")]
    Units {
        var: String,
        #[source]
        source: UnitError,
    },

    #[error("{var}: cannot rename to '{to}' (name already in use)")]
    Rename { var: String, to: String },

    #[error("{path}: variable '{var}' not found")]
    MissingVariable { path: PathBuf, var: String },

    #[error("variable '{var}' not present in the dataset")]
    NoSuchVariable { var: String },

    #[error("{var}: no input files")]
    NoInputs { var: String },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PreprocessError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PreprocessError::Coverage { .. } => ErrorKind::VarlistUnresolved,
            PreprocessError::Io { .. } => ErrorKind::Filesystem,
            PreprocessError::Store(e) => match e {
                StoreError::Unsupported => ErrorKind::Filesystem,
                _ => ErrorKind::Preprocess,
            },
            _ => ErrorKind::Preprocess,
        }
    }
}

/// Locks older than this are assumed abandoned.
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(600);

#[derive(Clone)]
pub struct Preprocessor {
    store: Arc<dyn DatasetStore>,
    work_dir: PathBuf,
    stale_after: Duration,
}

impl Preprocessor {
    pub fn new(store: Arc<dyn DatasetStore>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            work_dir: work_dir.into(),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Produce the plan's output file and return its path.
    ///
    /// Calls for the same output are serialized by a lock file. An output
    /// that already exists is reused as is; a new one is written next to
    /// it and renamed into place, so a finished path is never partial.
    #[instrument(skip_all, fields(var = %plan.var_name, case = %plan.case))]
    pub fn run(&self, plan: &PreprocessPlan) -> Result<PathBuf> {
        let output = plan.output_path(&self.work_dir);
        let (guard, waited) =
            FileLock::acquire(&output, self.stale_after).map_err(|source| PreprocessError::Io {
                path: FileLock::lock_path(&output),
                source,
            })?;
        if output.is_file() {
            debug!(output = %output.display(), waited, "reusing preprocessed output");
            return Ok(output);
        }

        let inputs = plan
            .inputs
            .iter()
            .map(|path| self.store.read(path).map(|ds| (path.as_path(), ds)))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let dataset = transform(plan, inputs)?;
        let partial = partial_path(&output);
        let written = self
            .store
            .write(&partial, &dataset)
            .and_then(|()| self.store.rename(&partial, &output));
        if let Err(e) = written {
            discard(&partial);
            return Err(e.into());
        }
        drop(guard);

        info!(output = %output.display(), chunks = plan.inputs.len(), "preprocessed");
        Ok(output)
    }
}

/// Where an output is written before it is renamed into place.
pub fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn discard(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "failed to remove partial output: {e}"),
    }
}

/// Apply the plan to already-read inputs.
pub fn transform(plan: &PreprocessPlan, inputs: Vec<(&Path, Dataset)>) -> Result<Dataset> {
    if inputs.is_empty() {
        return Err(PreprocessError::NoInputs {
            var: plan.var_name.clone(),
        });
    }
    let mut parts = Vec::with_capacity(inputs.len());
    for (path, ds) in inputs {
        // An already-preprocessed file carries the POD's name.
        let name = if ds.variable(&plan.source_name).is_some() {
            plan.source_name.as_str()
        } else {
            plan.var_name.as_str()
        };
        let part = ds
            .subset(name)
            .ok_or_else(|| PreprocessError::MissingVariable {
                path: path.to_path_buf(),
                var: plan.source_name.clone(),
            })?;
        parts.push((name.to_string(), part));
    }
    let source = parts[0].0.clone();
    let parts: Vec<Dataset> = parts.into_iter().map(|(_, ds)| ds).collect();

    let mut ds = if parts[0].time().is_some() {
        let joined = concat::concatenate(&source, parts, plan.frequency)?;
        crop::crop_years(&source, &joined, plan.first_year, plan.last_year, plan.frequency)?
    } else if parts.len() == 1 {
        parts.into_iter().next().unwrap_or_default()
    } else {
        return Err(PreprocessError::TimeAxis {
            var: source,
            detail: "several chunks without a time coordinate".to_string(),
        });
    };

    if let Some(hpa) = plan.level {
        ds = level::extract_level(&ds, &source, hpa)?;
    }
    if source != plan.var_name && !ds.rename_variable(&source, &plan.var_name) {
        return Err(PreprocessError::Rename {
            var: source,
            to: plan.var_name.clone(),
        });
    }
    if let Some(units) = &plan.units {
        convert::convert_units(&mut ds, &plan.var_name, units)?;
    }
    Ok(ds)
}
