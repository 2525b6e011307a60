//! Data catalog: one row per model file.
//!
//! Rows are keyed by `(variable_id, frequency, time_range, variant_label)`.
//! A second file with an existing key is rejected as an invalid asset, as
//! is any file whose name or header cannot be parsed. Invalid assets are
//! accumulated, never silently skipped.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use mdtf_foundation::{ErrorKind, Frequency, Reason, TimeRange};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod builder;
pub mod drs;
pub mod filename;
pub mod table;

pub use builder::CatalogBuilder;
pub use table::CatalogSchema;

/// Column order of the CSV table.
pub const COLUMNS: [&str; 17] = [
    "activity_id",
    "institution_id",
    "source_id",
    "experiment_id",
    "variant_label",
    "realm",
    "variable_id",
    "standard_name",
    "long_name",
    "units",
    "frequency",
    "chunk_freq",
    "time_range",
    "grid_label",
    "cell_methods",
    "file_name",
    "path",
];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("model data root {path} does not exist")]
    MissingRoot { path: PathBuf },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path}: {message}")]
    Schema { path: PathBuf, message: String },
}

impl CatalogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::Io { .. } => ErrorKind::Filesystem,
            _ => ErrorKind::CatalogParse,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub activity_id: String,
    pub institution_id: String,
    pub source_id: String,
    pub experiment_id: String,
    pub variant_label: String,
    pub realm: String,
    pub variable_id: String,
    pub standard_name: String,
    pub long_name: String,
    pub units: String,
    pub frequency: Frequency,
    pub chunk_freq: String,
    #[serde(with = "time_range_column")]
    pub time_range: Option<TimeRange>,
    pub grid_label: String,
    pub cell_methods: String,
    pub file_name: String,
    pub path: PathBuf,
}

type CatalogKey = (String, Frequency, Option<TimeRange>, String);

impl CatalogEntry {
    fn key(&self) -> CatalogKey {
        (
            self.variable_id.clone(),
            self.frequency,
            self.time_range,
            self.variant_label.clone(),
        )
    }
}

/// A file that could not become a catalog row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidAsset {
    pub path: PathBuf,
    pub reason: Reason,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    invalid: Vec<InvalidAsset>,
    keys: HashMap<CatalogKey, usize>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a row. Returns `false` and records an invalid asset when the
    /// row's key is already taken.
    pub fn push(&mut self, entry: CatalogEntry) -> bool {
        let key = entry.key();
        if let Some(&idx) = self.keys.get(&key) {
            let existing = &self.entries[idx];
            let message = format!(
                "duplicate catalog key (variable_id={}, frequency={}, time_range={}, variant_label={}) already provided by {}",
                entry.variable_id,
                entry.frequency,
                entry.time_range.map(|r| r.to_string()).unwrap_or_default(),
                entry.variant_label,
                existing.path.display()
            );
            self.reject(&entry.path, message);
            return false;
        }
        self.keys.insert(key, self.entries.len());
        self.entries.push(entry);
        true
    }

    pub fn reject(&mut self, path: &Path, message: impl Into<String>) {
        self.invalid.push(InvalidAsset {
            path: path.to_path_buf(),
            reason: Reason::new(ErrorKind::CatalogParse, message),
        });
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn invalid(&self) -> &[InvalidAsset] {
        &self.invalid
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rows for one variable at one frequency, in catalog order.
    pub fn candidates(&self, variable_id: &str, frequency: Frequency) -> Vec<&CatalogEntry> {
        self.entries
            .iter()
            .filter(|e| e.variable_id == variable_id && e.frequency == frequency)
            .collect()
    }
}

mod time_range_column {
    use mdtf_foundation::TimeRange;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<TimeRange>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(range) => serializer.collect_str(range),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<TimeRange>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.trim().is_empty() {
            return Ok(None);
        }
        raw.parse().map(Some).map_err(serde::de::Error::custom)
    }
}
