//! Catalog field lists: per-variable metadata used when a NetCDF file lacks
//! `standard_name`, `long_name` or `units`.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::jsonc;
use crate::subst::EnvSnapshot;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldList {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub variables: IndexMap<String, FieldEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldEntry {
    #[serde(default)]
    pub standard_name: Option<String>,
    #[serde(default)]
    pub long_name: Option<String>,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub realm: Option<String>,
}

impl FieldList {
    pub fn load(path: &Path, env: &EnvSnapshot) -> Result<FieldList> {
        jsonc::load(path, env)
    }

    pub fn lookup(&self, variable_id: &str) -> Option<&FieldEntry> {
        self.variables.get(variable_id)
    }
}
