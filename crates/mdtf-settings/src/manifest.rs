//! POD manifests (`<POD_ROOT>/<pod>/settings.jsonc`).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use mdtf_foundation::Frequency;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, SettingsError};
use crate::jsonc;
use crate::subst::EnvSnapshot;

pub const MANIFEST_FILE: &str = "settings.jsonc";

/// A loaded POD manifest together with where it came from.
#[derive(Debug, Clone)]
pub struct PodManifest {
    pub name: String,
    /// Directory holding the manifest and the driver (`POD_HOME`)
    pub home: PathBuf,
    pub settings: PodSettings,
    pub varlist: Vec<VarlistEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodSettings {
    #[serde(default)]
    pub long_name: String,
    /// Accepted for manifest compatibility; not used by the framework.
    #[serde(default)]
    pub description: Option<String>,
    /// Driver script relative to `POD_HOME`
    pub driver: String,
    pub conda_env: String,
    #[serde(default)]
    pub pod_env_vars: IndexMap<String, Value>,
    /// Accepted but not checked; the POD's `conda_env` provides these.
    #[serde(default)]
    pub runtime_requirements: IndexMap<String, Vec<String>>,
}

/// One required variable. Alternates are tried in order when the entry
/// itself is not in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VarlistEntry {
    /// In-file name the POD expects; filled from the map key in map form
    #[serde(default)]
    pub var_name: String,
    /// Catalog `variable_id`; defaults to `var_name`
    #[serde(default)]
    pub name_in_model: Option<String>,
    pub freq: Frequency,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub alternates: Vec<Alternate>,
    /// Pressure level in hPa
    #[serde(default)]
    pub level: Option<f64>,
    #[serde(default)]
    pub units: Option<String>,
    /// Excludes catalog rows recording a different `standard_name`
    #[serde(default)]
    pub standard_name: Option<String>,
    /// Excludes catalog rows recording a different `realm`
    #[serde(default)]
    pub realm: Option<String>,
    /// Accepted but not checked against the data
    #[serde(default)]
    pub dimensions: Vec<String>,
}

/// An alternate is either a full entry or the `var_name` of another entry
/// in the same varlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Alternate {
    Ref(String),
    Entry(Box<VarlistEntry>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawVarlist {
    List(Vec<VarlistEntry>),
    Map(IndexMap<String, VarlistEntry>),
}

#[derive(Deserialize)]
struct RawManifest {
    settings: PodSettings,
    #[serde(default)]
    varlist: Option<RawVarlist>,
}

fn default_required() -> bool {
    true
}

impl VarlistEntry {
    /// Name looked up in the catalog.
    pub fn catalog_name(&self) -> &str {
        self.name_in_model.as_deref().unwrap_or(&self.var_name)
    }
}

impl PodManifest {
    pub fn path(pod_root: &Path, name: &str) -> PathBuf {
        pod_root.join(name).join(MANIFEST_FILE)
    }

    /// Load the manifest of POD `name`. A missing manifest means the POD
    /// name is unknown.
    pub fn load(pod_root: &Path, name: &str, env: &EnvSnapshot) -> Result<PodManifest> {
        let path = Self::path(pod_root, name);
        if !path.is_file() {
            return Err(SettingsError::schema(
                &path,
                format!("unknown POD name '{name}' (no manifest)"),
            ));
        }
        let raw: RawManifest = jsonc::load(&path, env)?;
        let manifest = Self::from_raw(name, pod_root.join(name), &path, raw)?;
        debug!(pod = %name, vars = manifest.varlist.len(), "loaded POD manifest");
        Ok(manifest)
    }

    pub fn parse(name: &str, home: &Path, text: &str, env: &EnvSnapshot) -> Result<PodManifest> {
        let path = home.join(MANIFEST_FILE);
        let raw: RawManifest = jsonc::parse(&path, text, env)?;
        Self::from_raw(name, home.to_path_buf(), &path, raw)
    }

    fn from_raw(name: &str, home: PathBuf, path: &Path, raw: RawManifest) -> Result<PodManifest> {
        let varlist = match raw.varlist {
            None => Vec::new(),
            Some(RawVarlist::List(entries)) => entries,
            Some(RawVarlist::Map(map)) => map
                .into_iter()
                .map(|(key, mut entry)| {
                    if entry.var_name.is_empty() {
                        entry.var_name = key;
                    }
                    entry
                })
                .collect(),
        };

        if raw.settings.driver.trim().is_empty() {
            return Err(SettingsError::schema(path, "settings.driver is empty"));
        }

        let mut names = HashSet::new();
        for entry in &varlist {
            if entry.var_name.is_empty() {
                return Err(SettingsError::schema(path, "varlist entry without var_name"));
            }
            if !names.insert(entry.var_name.as_str()) {
                return Err(SettingsError::schema(
                    path,
                    format!("duplicate varlist entry '{}'", entry.var_name),
                ));
            }
        }
        for entry in &varlist {
            check_alternates(path, entry, &names)?;
        }

        Ok(PodManifest {
            name: name.to_string(),
            home,
            settings: raw.settings,
            varlist,
        })
    }

    /// Look up a top-level entry by `var_name`.
    pub fn entry(&self, var_name: &str) -> Option<&VarlistEntry> {
        self.varlist.iter().find(|e| e.var_name == var_name)
    }

    pub fn driver_path(&self) -> PathBuf {
        self.home.join(&self.settings.driver)
    }

    /// `pod_env_vars` rendered as strings.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        self.settings
            .pod_env_vars
            .iter()
            .map(|(k, v)| {
                let rendered = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), rendered)
            })
            .collect()
    }
}

fn check_alternates(path: &Path, entry: &VarlistEntry, names: &HashSet<&str>) -> Result<()> {
    for alt in &entry.alternates {
        match alt {
            Alternate::Ref(name) if !names.contains(name.as_str()) => {
                return Err(SettingsError::schema(
                    path,
                    format!(
                        "alternate '{name}' of '{}' is not a varlist entry",
                        entry.var_name
                    ),
                ));
            }
            Alternate::Ref(_) => {}
            Alternate::Entry(inner) => {
                if inner.var_name.is_empty() && inner.name_in_model.is_none() {
                    return Err(SettingsError::schema(
                        path,
                        format!("alternate of '{}' has no var_name", entry.var_name),
                    ));
                }
                check_alternates(path, inner, names)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
      "settings": {
        "long_name": "Example diagnostic",
        "driver": "example.py",
        "conda_env": "python3_base",
        "pod_env_vars": { "THRESHOLD": 0.5, "MODE": "fast" }
      },
      "varlist": [
        { "var_name": "pr", "freq": "daily", "units": "mm/day",
          "alternates": [ { "var_name": "prc", "freq": "day" } ] },
        { "var_name": "ua200", "name_in_model": "ua", "freq": "mon",
          "level": 200, "required": false },
        { "var_name": "tas", "freq": "mon", "alternates": ["ts"] },
        { "var_name": "ts", "freq": "mon", "required": false }
      ]
    }"#;

    fn load(text: &str) -> Result<PodManifest> {
        PodManifest::parse("example", Path::new("/pods/example"), text, &EnvSnapshot::default())
    }

    #[test]
    fn parses_array_varlist() {
        let manifest = load(MANIFEST).unwrap();
        assert_eq!(manifest.varlist.len(), 4);
        let pr = manifest.entry("pr").unwrap();
        assert_eq!(pr.freq, Frequency::Day);
        assert!(pr.required);
        assert!(matches!(&pr.alternates[0], Alternate::Entry(e) if e.var_name == "prc"));
        let ua = manifest.entry("ua200").unwrap();
        assert_eq!(ua.catalog_name(), "ua");
        assert_eq!(ua.level, Some(200.0));
        assert_eq!(manifest.driver_path(), PathBuf::from("/pods/example/example.py"));
        assert_eq!(
            manifest.env_vars(),
            vec![
                ("THRESHOLD".to_string(), "0.5".to_string()),
                ("MODE".to_string(), "fast".to_string())
            ]
        );
    }

    #[test]
    fn parses_map_varlist_in_key_order() {
        let text = r#"{
          "settings": { "driver": "d.ncl", "conda_env": "ncl" },
          "varlist": { "zg": { "freq": "mon", "level": 500 }, "psl": { "freq": "mon" } }
        }"#;
        let manifest = load(text).unwrap();
        let names: Vec<&str> = manifest.varlist.iter().map(|e| e.var_name.as_str()).collect();
        assert_eq!(names, ["zg", "psl"]);
    }

    #[test]
    fn unknown_frequency_is_schema_error() {
        let text = MANIFEST.replace("\"daily\"", "\"fortnightly\"");
        let err = load(&text).unwrap_err();
        assert_eq!(err.kind(), mdtf_foundation::ErrorKind::ConfigSchema);
    }

    #[test]
    fn dangling_alternate_reference() {
        let text = MANIFEST.replace("[\"ts\"]", "[\"tos\"]");
        let err = load(&text).unwrap_err();
        assert!(err.to_string().contains("alternate 'tos'"));
    }

    #[test]
    fn missing_manifest_is_unknown_pod() {
        let dir = tempfile::tempdir().unwrap();
        let err = PodManifest::load(dir.path(), "nope", &EnvSnapshot::default()).unwrap_err();
        assert!(err.to_string().contains("unknown POD name 'nope'"));
    }
}
