//! Catalog construction from a model-data tree.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mdtf_foundation::{Frequency, TimeRange};
use mdtf_settings::{CatalogStyle, FieldList};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use super::{Catalog, CatalogEntry, CatalogError, drs, filename};
use crate::dataset::Dataset;
use crate::store::DatasetStore;

/// Columns a path or attribute parser must supply.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub realm: String,
    pub variable_id: String,
    pub frequency: Frequency,
    pub chunk_freq: String,
}

pub struct CatalogBuilder {
    root: PathBuf,
    style: CatalogStyle,
    store: Arc<dyn DatasetStore>,
    field_list: Option<FieldList>,
}

impl CatalogBuilder {
    pub fn new(root: impl Into<PathBuf>, style: CatalogStyle, store: Arc<dyn DatasetStore>) -> Self {
        Self {
            root: root.into(),
            style,
            store,
            field_list: None,
        }
    }

    pub fn with_field_list(mut self, field_list: FieldList) -> Self {
        self.field_list = Some(field_list);
        self
    }

    /// Walk the root in sorted order and catalog every `*.nc` file.
    ///
    /// Per-file failures become invalid assets; only a missing root or a
    /// failed directory read is an error.
    #[instrument(skip(self), fields(root = %self.root.display(), style = ?self.style))]
    pub fn build(&self) -> Result<Catalog, CatalogError> {
        if !self.root.is_dir() {
            return Err(CatalogError::MissingRoot {
                path: self.root.clone(),
            });
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&self.root).to_path_buf();
                CatalogError::Io {
                    path,
                    source: e.into(),
                }
            })?;
            if entry.file_type().is_file() && entry.path().extension().is_some_and(|x| x == "nc") {
                files.push(entry.into_path());
            }
        }
        files.sort();

        let mut catalog = Catalog::new();
        let mut unlisted = HashSet::new();
        for path in &files {
            match self.catalog_file(path, &mut unlisted) {
                Ok(entry) => {
                    if !catalog.push(entry) {
                        warn!(path = %path.display(), "duplicate catalog key, file rejected");
                    }
                }
                Err(reason) => {
                    warn!(path = %path.display(), "invalid asset: {reason}");
                    catalog.reject(path, format!("{}: {reason}", path.display()));
                }
            }
        }

        info!(
            files = files.len(),
            entries = catalog.len(),
            invalid = catalog.invalid().len(),
            "catalog built"
        );
        Ok(catalog)
    }

    fn catalog_file(&self, path: &Path, unlisted: &mut HashSet<String>) -> Result<CatalogEntry, String> {
        let header = self.store.read_header(path).map_err(|e| e.to_string())?;
        let identity = match self.style {
            CatalogStyle::Drs => {
                let relative = path.strip_prefix(&self.root).unwrap_or(path);
                drs::identify(relative)?
            }
            CatalogStyle::Filename => filename::identify(&header)?,
        };
        let variable = header.variable(&identity.variable_id).ok_or_else(|| {
            format!("variable '{}' not present in the file", identity.variable_id)
        })?;

        let attr = |key: &str| variable.text_attr(key).unwrap_or_default().to_string();
        let global = |key: &str| header.global_text(key).unwrap_or_default().to_string();
        let mut entry = CatalogEntry {
            activity_id: global("activity_id"),
            institution_id: global("institution_id"),
            source_id: header
                .global_text("source_id")
                .or_else(|| header.global_text("model"))
                .unwrap_or_default()
                .to_string(),
            experiment_id: global("experiment_id"),
            variant_label: global("variant_label"),
            realm: identity.realm,
            variable_id: identity.variable_id,
            standard_name: attr("standard_name"),
            long_name: attr("long_name"),
            units: attr("units"),
            frequency: identity.frequency,
            chunk_freq: identity.chunk_freq,
            time_range: time_range(&header)?,
            grid_label: global("grid_label"),
            cell_methods: attr("cell_methods"),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: path.to_path_buf(),
        };
        self.fill_from_field_list(&mut entry, unlisted);
        debug!(path = %path.display(), var = %entry.variable_id, "cataloged");
        Ok(entry)
    }

    fn fill_from_field_list(&self, entry: &mut CatalogEntry, unlisted: &mut HashSet<String>) {
        let incomplete = entry.standard_name.is_empty()
            || entry.long_name.is_empty()
            || entry.units.is_empty()
            || entry.realm.is_empty();
        if !incomplete {
            return;
        }
        let Some(field_list) = &self.field_list else {
            return;
        };
        let Some(field) = field_list.lookup(&entry.variable_id) else {
            if unlisted.insert(entry.variable_id.clone()) {
                warn!(var = %entry.variable_id, "variable missing from the field list; metadata left empty");
            }
            return;
        };
        let fill = |slot: &mut String, value: &Option<String>| {
            if slot.is_empty()
                && let Some(v) = value
            {
                *slot = v.clone();
            }
        };
        fill(&mut entry.standard_name, &field.standard_name);
        fill(&mut entry.long_name, &field.long_name);
        fill(&mut entry.units, &field.units);
        fill(&mut entry.realm, &field.realm);
    }
}

/// First and last decoded `time` values; `None` without a time axis.
fn time_range(header: &Dataset) -> Result<Option<TimeRange>, String> {
    let Some(values) = header.time_values().filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let Some(units) = header.time_units() else {
        return Ok(None);
    };
    let units = units.map_err(|e| format!("time axis: {e}"))?;
    let (first, last) = (values[0], values[values.len() - 1]);
    if !first.is_finite() || !last.is_finite() {
        return Err("time axis contains non-finite values".to_string());
    }
    Ok(Some(TimeRange::new(units.decode(first), units.decode(last))))
}
