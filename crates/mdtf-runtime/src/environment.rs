//! POD interpreter environments and the variables exported to drivers.
//!
//! The framework never modifies its own process environment. Everything a
//! POD sees is collected into a [`PodEnvironment`] and applied to the child
//! command only.

use std::path::{Path, PathBuf};

use mdtf_data::PreprocessPlan;
use mdtf_settings::{CaseConfig, EnvManagerKind, EnvironmentSettings, Paths, PodManifest};
use tracing::debug;

use crate::error::{Result, RuntimeError};

/// Maps environment names to activation commands.
#[derive(Debug, Clone)]
pub struct EnvironmentManager {
    kind: EnvManagerKind,
    conda_root: Option<PathBuf>,
    env_root: Option<PathBuf>,
}

impl EnvironmentManager {
    pub fn new(settings: &EnvironmentSettings) -> Self {
        Self {
            kind: settings.manager,
            conda_root: settings.conda_root.clone(),
            env_root: settings.env_root.clone(),
        }
    }

    /// Manager that runs drivers in the inherited environment.
    pub fn none() -> Self {
        Self {
            kind: EnvManagerKind::None,
            conda_root: None,
            env_root: None,
        }
    }

    pub fn kind(&self) -> EnvManagerKind {
        self.kind
    }

    fn env_dir(&self, name: &str) -> Result<PathBuf> {
        let root = self.env_root.as_deref().ok_or_else(|| RuntimeError::EnvironmentNotFound {
            name: name.to_string(),
            path: PathBuf::new(),
        })?;
        let dir = root.join(name);
        let marker = match self.kind {
            EnvManagerKind::Venv => dir.join("bin").join("activate"),
            _ => dir.clone(),
        };
        if !marker.exists() {
            return Err(RuntimeError::EnvironmentNotFound {
                name: name.to_string(),
                path: marker,
            });
        }
        Ok(dir)
    }

    /// Shell steps that activate environment `name`, in order.
    pub fn activation(&self, name: &str) -> Result<Vec<String>> {
        match self.kind {
            EnvManagerKind::None => Ok(Vec::new()),
            EnvManagerKind::Conda => {
                let dir = self.env_dir(name)?;
                let conda_root = self.conda_root.as_deref().unwrap_or(Path::new(""));
                let init = conda_root.join("etc").join("profile.d").join("conda.sh");
                Ok(vec![
                    format!("source {}", shell_quote(&init.to_string_lossy())),
                    format!("conda activate {}", shell_quote(&dir.to_string_lossy())),
                ])
            }
            EnvManagerKind::Venv => {
                let dir = self.env_dir(name)?;
                let activate = dir.join("bin").join("activate");
                Ok(vec![format!("source {}", shell_quote(&activate.to_string_lossy()))])
            }
        }
    }

    /// Full `bash -c` command line for a POD: activation steps followed by
    /// the driver.
    pub fn command(&self, manifest: &PodManifest) -> Result<String> {
        let mut steps = self.activation(&manifest.settings.conda_env)?;
        let driver = manifest.driver_path();
        let quoted = shell_quote(&driver.to_string_lossy());
        steps.push(match interpreter(&driver) {
            Some(program) => format!("{program} {quoted}"),
            None => quoted,
        });
        let command = steps.join(" && ");
        debug!(pod = %manifest.name, %command, "prepared POD command");
        Ok(command)
    }
}

/// Interpreter for a driver script, chosen by extension. `None` means the
/// driver is executed directly.
pub fn interpreter(driver: &Path) -> Option<&'static str> {
    match driver.extension()?.to_str()? {
        "py" => Some("python"),
        "ncl" => Some("ncl"),
        "R" => Some("Rscript"),
        "sh" => Some("bash"),
        _ => None,
    }
}

/// Single-quote `s` for POSIX shells.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"/._-+=:,@%".contains(&b))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// A preprocessed variable as the POD sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedVariable {
    /// Name inside the file, equal to the varlist `var_name`.
    pub var_name: String,
    pub file: PathBuf,
}

impl ExportedVariable {
    /// `<var_name>_var`, the variable holding the in-file name.
    pub fn tag(&self) -> String {
        format!("{}_var", self.var_name)
    }
}

/// Variables exported to one POD driver, in a stable order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodEnvironment {
    vars: Vec<(String, String)>,
}

impl PodEnvironment {
    pub fn build(
        case: &CaseConfig,
        paths: &Paths,
        manifest: &PodManifest,
        work_dir: &Path,
        variables: &[ExportedVariable],
    ) -> Self {
        let mut env = PodEnvironment::default();
        let path = |p: &Path| p.to_string_lossy().into_owned();

        env.set("CASENAME", &case.name);
        env.set("FIRSTYR", &case.first_year.to_string());
        env.set("LASTYR", &case.last_year.to_string());
        env.set("startdate", &format!("{:04}0101", case.first_year));
        env.set("enddate", &format!("{:04}1231", case.last_year));
        env.set(
            "DATADIR",
            &path(&PreprocessPlan::inputs_dir(&paths.work_dir, &case.name)),
        );
        env.set("OBS_DATA", &path(&paths.obs_data));
        env.set("WORK_DIR", &path(work_dir));
        env.set("POD_HOME", &path(&manifest.home));

        for variable in variables {
            let tag = variable.tag();
            env.set(&format!("{tag}_FILE"), &path(&variable.file));
            env.set(
                &format!("{}_FILE", variable.var_name.to_uppercase()),
                &path(&variable.file),
            );
            env.set(&tag, &variable.var_name);
        }
        for (key, value) in manifest.env_vars() {
            env.set(&key, &value);
        }
        env
    }

    /// Insert or replace `key`, keeping first-insertion order.
    pub fn set(&mut self, key: &str, value: &str) {
        match self.vars.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.vars.push((key.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdtf_settings::EnvSnapshot;
    use std::fs;

    const MANIFEST: &str = r#"{
        "settings": {
            "long_name": "Example",
            "driver": "example.py",
            "conda_env": "python3_base",
            "pod_env_vars": { "EXAMPLE_FLAG": 1, "EXAMPLE_MODE": "fast" }
        },
        "varlist": { "pr": { "freq": "day" } }
    }"#;

    fn manifest() -> PodManifest {
        PodManifest::parse("example", Path::new("/pods/example"), MANIFEST, &EnvSnapshot::default())
            .unwrap()
    }

    #[test]
    fn conda_activation_requires_the_env_directory() {
        let dir = tempfile::tempdir().unwrap();
        let settings = EnvironmentSettings {
            manager: EnvManagerKind::Conda,
            conda_root: Some(PathBuf::from("/opt/conda")),
            env_root: Some(dir.path().to_path_buf()),
        };
        let manager = EnvironmentManager::new(&settings);
        let err = manager.command(&manifest()).unwrap_err();
        assert!(matches!(err, RuntimeError::EnvironmentNotFound { .. }));
        assert_eq!(err.kind().code(), "E006");

        fs::create_dir(dir.path().join("python3_base")).unwrap();
        let command = manager.command(&manifest()).unwrap();
        assert_eq!(
            command,
            format!(
                "source /opt/conda/etc/profile.d/conda.sh && conda activate {}/python3_base && python /pods/example/example.py",
                dir.path().display()
            )
        );
    }

    #[test]
    fn venv_activation_sources_the_activate_script() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("python3_base/bin")).unwrap();
        fs::write(dir.path().join("python3_base/bin/activate"), "").unwrap();
        let settings = EnvironmentSettings {
            manager: EnvManagerKind::Venv,
            conda_root: None,
            env_root: Some(dir.path().to_path_buf()),
        };
        let steps = EnvironmentManager::new(&settings).activation("python3_base").unwrap();
        assert_eq!(steps.len(), 1);
        assert!(steps[0].starts_with("source "));
        assert!(steps[0].ends_with("python3_base/bin/activate"));
    }

    #[test]
    fn interpreters_by_extension() {
        assert_eq!(interpreter(Path::new("a.py")), Some("python"));
        assert_eq!(interpreter(Path::new("a.ncl")), Some("ncl"));
        assert_eq!(interpreter(Path::new("a.R")), Some("Rscript"));
        assert_eq!(interpreter(Path::new("a.sh")), Some("bash"));
        assert_eq!(interpreter(Path::new("driver")), None);
        assert_eq!(shell_quote("it's here"), r"'it'\''s here'");
    }

    #[test]
    fn exported_variables() {
        let config = mdtf_settings::Config::parse(
            Path::new("config.jsonc"),
            r#"{
                "case_list": [{ "CASENAME": "CM4_hist", "FIRSTYR": 1990, "LASTYR": 1999 }],
                "pod_list": ["example"],
                "paths": {
                    "OBS_DATA": "/obs", "MODEL_DATA": "/model", "WORK_DIR": "/work",
                    "OUTPUT_DIR": "/out", "POD_ROOT": "/pods"
                },
                "settings": { "environment": { "manager": "none" } }
            }"#,
            &EnvSnapshot::default(),
        )
        .unwrap();
        let variables = [ExportedVariable {
            var_name: "pr".into(),
            file: PathBuf::from("/work/CM4_hist/inputs/day/CM4_hist.pr.day.nc"),
        }];
        let env = PodEnvironment::build(
            &config.case_list[0],
            &config.paths,
            &manifest(),
            Path::new("/work/CM4_hist/example"),
            &variables,
        );
        assert_eq!(env.get("CASENAME"), Some("CM4_hist"));
        assert_eq!(env.get("startdate"), Some("19900101"));
        assert_eq!(env.get("enddate"), Some("19991231"));
        assert_eq!(env.get("DATADIR"), Some("/work/CM4_hist/inputs"));
        assert_eq!(env.get("WORK_DIR"), Some("/work/CM4_hist/example"));
        assert_eq!(env.get("pr_var"), Some("pr"));
        assert_eq!(
            env.get("pr_var_FILE"),
            Some("/work/CM4_hist/inputs/day/CM4_hist.pr.day.nc")
        );
        assert_eq!(env.get("PR_FILE"), env.get("pr_var_FILE"));
        assert_eq!(env.get("EXAMPLE_FLAG"), Some("1"));
        assert_eq!(env.get("EXAMPLE_MODE"), Some("fast"));
    }
}
