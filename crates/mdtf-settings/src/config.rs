//! Top-level run configuration.
//!
//! Every field is either required or carries an explicit default. A
//! [`Config`] is immutable once [`Config::load`] returns; CLI overrides
//! produce a new value through [`Config::with_overrides`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SettingsError};
use crate::jsonc;
use crate::subst::EnvSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_run_id")]
    pub run_id: String,
    pub case_list: Vec<CaseConfig>,
    pub pod_list: Vec<String>,
    pub paths: Paths,
    #[serde(default)]
    pub settings: RunSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaseConfig {
    #[serde(rename = "CASENAME")]
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(rename = "FIRSTYR")]
    pub first_year: i32,
    #[serde(rename = "LASTYR")]
    pub last_year: i32,
    /// Input root; defaults to `<MODEL_DATA>/<CASENAME>`
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub variant_label: Option<String>,
    #[serde(default)]
    pub catalog_style: CatalogStyle,
    /// Prebuilt catalog CSV; built on the fly when absent
    #[serde(default)]
    pub catalog: Option<PathBuf>,
    #[serde(default)]
    pub pod_list: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogStyle {
    #[default]
    Drs,
    Filename,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Paths {
    #[serde(rename = "OBS_DATA")]
    pub obs_data: PathBuf,
    #[serde(rename = "MODEL_DATA", default)]
    pub model_data: Option<PathBuf>,
    #[serde(rename = "WORK_DIR")]
    pub work_dir: PathBuf,
    #[serde(rename = "OUTPUT_DIR")]
    pub output_dir: PathBuf,
    #[serde(rename = "POD_ROOT")]
    pub pod_root: PathBuf,
    #[serde(rename = "FIELD_LIST", default)]
    pub field_list: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSettings {
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub make_tar: bool,
    #[serde(default = "default_verbose")]
    pub verbose: u8,
    #[serde(default)]
    pub keep_temp: bool,
    #[serde(default = "default_workers")]
    pub num_workers: usize,
    /// Per-POD wall-clock limit; unbounded when absent
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_grace")]
    pub grace_period_secs: u64,
    #[serde(default)]
    pub output_escape_policy: OutputEscapePolicy,
    #[serde(default)]
    pub environment: EnvironmentSettings,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            test_mode: false,
            overwrite: false,
            make_tar: false,
            verbose: default_verbose(),
            keep_temp: false,
            num_workers: default_workers(),
            timeout_secs: None,
            grace_period_secs: default_grace(),
            output_escape_policy: OutputEscapePolicy::default(),
            environment: EnvironmentSettings::default(),
        }
    }
}

/// What to do with files a POD writes outside its own output directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputEscapePolicy {
    #[default]
    Warn,
    Fail,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvManagerKind {
    #[default]
    Conda,
    Venv,
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentSettings {
    #[serde(default)]
    pub manager: EnvManagerKind,
    #[serde(default)]
    pub conda_root: Option<PathBuf>,
    /// Directory holding one environment per name
    #[serde(default)]
    pub env_root: Option<PathBuf>,
}

/// CLI flags layered over the file's settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides {
    pub overwrite: bool,
    pub test_mode: bool,
    pub workers: Option<usize>,
}

fn default_run_id() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

fn default_verbose() -> u8 {
    1
}

fn default_workers() -> usize {
    1
}

fn default_grace() -> u64 {
    30
}

impl Config {
    pub fn load(path: &Path, env: &EnvSnapshot) -> Result<Config> {
        let config: Config = jsonc::load(path, env)?;
        config.validate(path)?;
        debug!(
            path = %path.display(),
            cases = config.case_list.len(),
            pods = config.pod_list.len(),
            "loaded configuration"
        );
        Ok(config)
    }

    pub fn parse(path: &Path, text: &str, env: &EnvSnapshot) -> Result<Config> {
        let config: Config = jsonc::parse(path, text, env)?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if self.case_list.is_empty() {
            return Err(SettingsError::schema(path, "case_list is empty"));
        }
        let mut names = HashSet::new();
        for case in &self.case_list {
            if case.name.trim().is_empty() {
                return Err(SettingsError::schema(path, "case with empty CASENAME"));
            }
            if !names.insert(case.name.as_str()) {
                return Err(SettingsError::schema(
                    path,
                    format!("duplicate CASENAME '{}'", case.name),
                ));
            }
            if case.first_year > case.last_year {
                return Err(SettingsError::schema(
                    path,
                    format!(
                        "case '{}': FIRSTYR {} is after LASTYR {}",
                        case.name, case.first_year, case.last_year
                    ),
                ));
            }
            if case.root.is_none() && self.paths.model_data.is_none() {
                return Err(SettingsError::schema(
                    path,
                    format!("case '{}' has no root and paths.MODEL_DATA is not set", case.name),
                ));
            }
        }
        if self.settings.num_workers == 0 {
            return Err(SettingsError::schema(path, "settings.num_workers must be at least 1"));
        }
        let env = &self.settings.environment;
        match env.manager {
            EnvManagerKind::Conda if env.conda_root.is_none() || env.env_root.is_none() => {
                return Err(SettingsError::schema(
                    path,
                    "conda environment manager needs settings.environment.conda_root and env_root",
                ));
            }
            EnvManagerKind::Venv if env.env_root.is_none() => {
                return Err(SettingsError::schema(
                    path,
                    "venv environment manager needs settings.environment.env_root",
                ));
            }
            _ => {}
        }
        Ok(())
    }

    pub fn with_overrides(&self, overrides: Overrides) -> Config {
        let mut config = self.clone();
        config.settings.overwrite |= overrides.overwrite;
        config.settings.test_mode |= overrides.test_mode;
        if let Some(workers) = overrides.workers.filter(|&w| w > 0) {
            config.settings.num_workers = workers;
        }
        config
    }

    /// Every POD name referenced anywhere in the configuration, first
    /// occurrence order.
    pub fn all_pods(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.pod_list
            .iter()
            .chain(self.case_list.iter().flat_map(|c| c.pod_list.iter().flatten()))
            .map(String::as_str)
            .filter(|p| seen.insert(*p))
            .collect()
    }
}

impl CaseConfig {
    pub fn root(&self, paths: &Paths) -> PathBuf {
        match (&self.root, &paths.model_data) {
            (Some(root), _) => root.clone(),
            (None, Some(model_data)) => model_data.join(&self.name),
            (None, None) => PathBuf::from(&self.name),
        }
    }

    /// The case's POD list, falling back to the top-level one.
    pub fn pods<'a>(&'a self, default: &'a [String]) -> &'a [String] {
        self.pod_list.as_deref().unwrap_or(default)
    }
}
