//! CSV catalog table and its JSON sidecar schema.
//!
//! The sidecar sits next to the table with the extension replaced by
//! `.json` (`catalog.csv` → `catalog.json`) and follows the layout of an
//! ESM collection description: column list with types, asset column and
//! format, and the aggregation key.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{COLUMNS, Catalog, CatalogEntry, CatalogError};

const ESMCAT_VERSION: &str = "0.0.1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSchema {
    pub esmcat_version: String,
    pub id: String,
    pub description: String,
    pub catalog_file: String,
    pub attributes: Vec<ColumnSpec>,
    pub assets: AssetSpec,
    pub aggregation_control: AggregationControl,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub column_name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(default)]
    pub vocabulary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSpec {
    pub column_name: String,
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationControl {
    pub variable_column_name: String,
    /// Columns that together identify one row
    pub key: Vec<String>,
    pub groupby_attrs: Vec<String>,
    pub aggregations: Vec<Aggregation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    #[serde(rename = "type")]
    pub kind: String,
    pub attribute_name: String,
    #[serde(default)]
    pub dim: Option<String>,
}

fn column_type(column: &str) -> &'static str {
    match column {
        "frequency" => "enum(mon,day,6hr,3hr,1hr,annual)",
        "time_range" => "time_range(YYYYMMDD:HHMMSS-YYYYMMDD:HHMMSS)",
        "path" => "path",
        _ => "string",
    }
}

impl CatalogSchema {
    pub fn for_table(table: &Path) -> Self {
        let file_name = table
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            esmcat_version: ESMCAT_VERSION.to_string(),
            id: table
                .file_stem()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            description: "MDTF model data catalog".to_string(),
            catalog_file: file_name,
            attributes: COLUMNS
                .iter()
                .map(|c| ColumnSpec {
                    column_name: c.to_string(),
                    column_type: column_type(c).to_string(),
                    vocabulary: String::new(),
                })
                .collect(),
            assets: AssetSpec {
                column_name: "path".to_string(),
                format: "netcdf".to_string(),
            },
            aggregation_control: AggregationControl {
                variable_column_name: "variable_id".to_string(),
                key: ["variable_id", "frequency", "time_range", "variant_label"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                groupby_attrs: [
                    "activity_id",
                    "institution_id",
                    "source_id",
                    "experiment_id",
                    "frequency",
                    "variant_label",
                    "grid_label",
                    "realm",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
                aggregations: vec![Aggregation {
                    kind: "join_existing".to_string(),
                    attribute_name: "time_range".to_string(),
                    dim: Some("time".to_string()),
                }],
            },
        }
    }

    pub fn sidecar_path(table: &Path) -> PathBuf {
        table.with_extension("json")
    }

    fn column_names(&self) -> Vec<&str> {
        self.attributes.iter().map(|c| c.column_name.as_str()).collect()
    }
}

impl Catalog {
    /// Write the table and its sidecar schema.
    pub fn write(&self, table: &Path) -> Result<(), CatalogError> {
        if let Some(parent) = table.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| CatalogError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let csv_err = |source| CatalogError::Csv {
            path: table.to_path_buf(),
            source,
        };
        let mut writer = csv::Writer::from_path(table).map_err(csv_err)?;
        if self.entries().is_empty() {
            writer.write_record(COLUMNS).map_err(csv_err)?;
        }
        for entry in self.entries() {
            writer.serialize(entry).map_err(csv_err)?;
        }
        writer.flush().map_err(|source| CatalogError::Io {
            path: table.to_path_buf(),
            source,
        })?;

        let sidecar = CatalogSchema::sidecar_path(table);
        let schema = CatalogSchema::for_table(table);
        let json = serde_json::to_string_pretty(&schema).map_err(|source| CatalogError::Json {
            path: sidecar.clone(),
            source,
        })?;
        fs::write(&sidecar, json + "\n").map_err(|source| CatalogError::Io {
            path: sidecar.clone(),
            source,
        })?;

        info!(
            catalog = %table.display(),
            entries = self.len(),
            invalid = self.invalid().len(),
            "wrote catalog"
        );
        Ok(())
    }

    /// Read a table written by [`Catalog::write`], checking its header
    /// against the sidecar schema.
    pub fn load(table: &Path) -> Result<Catalog, CatalogError> {
        let sidecar = CatalogSchema::sidecar_path(table);
        let text = fs::read_to_string(&sidecar).map_err(|source| CatalogError::Io {
            path: sidecar.clone(),
            source,
        })?;
        let schema: CatalogSchema =
            serde_json::from_str(&text).map_err(|source| CatalogError::Json {
                path: sidecar.clone(),
                source,
            })?;
        if schema.column_names() != COLUMNS {
            return Err(CatalogError::Schema {
                path: sidecar,
                message: format!(
                    "schema columns {:?} do not match the expected {:?}",
                    schema.column_names(),
                    COLUMNS
                ),
            });
        }

        let csv_err = |source| CatalogError::Csv {
            path: table.to_path_buf(),
            source,
        };
        let mut reader = csv::Reader::from_path(table).map_err(csv_err)?;
        let header: Vec<String> = reader
            .headers()
            .map_err(csv_err)?
            .iter()
            .map(str::to_string)
            .collect();
        if header != COLUMNS {
            return Err(CatalogError::Schema {
                path: table.to_path_buf(),
                message: format!("table header {header:?} does not match the schema columns"),
            });
        }

        let mut catalog = Catalog::new();
        for (line, row) in reader.deserialize::<CatalogEntry>().enumerate() {
            match row {
                Ok(entry) => {
                    catalog.push(entry);
                }
                Err(e) => {
                    warn!(catalog = %table.display(), row = line + 2, "unreadable catalog row: {e}");
                    catalog.reject(table, format!("row {}: {e}", line + 2));
                }
            }
        }
        Ok(catalog)
    }
}
