//! Assembling the output directory once every POD has finished.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};

use mdtf_settings::{CaseConfig, Config, PodManifest};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::error::{Result, RuntimeError};
use crate::html::{self, IndexEntry};
use crate::record::{RECORDS_FILE, RunRecord, RunStatus, write_records};

pub const INDEX_FILE: &str = "index.html";

/// Shared preprocessed inputs, one per case; never published.
const INPUTS_DIR: &str = "inputs";

#[derive(Debug, Clone)]
pub struct Packager {
    work_dir: PathBuf,
    output_dir: PathBuf,
    overwrite: bool,
    make_tar: bool,
    keep_temp: bool,
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

impl Packager {
    pub fn new(config: &Config) -> Self {
        Self {
            work_dir: config.paths.work_dir.clone(),
            output_dir: config.paths.output_dir.clone(),
            overwrite: config.settings.overwrite,
            make_tar: config.settings.make_tar,
            keep_temp: config.settings.keep_temp,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn archive_path(&self) -> PathBuf {
        sibling(&self.output_dir, ".tar")
    }

    /// Refuse to start a run whose output would clobber an existing,
    /// non-empty directory without `overwrite`.
    pub fn check_destination(&self) -> Result<()> {
        if self.overwrite {
            return Ok(());
        }
        let occupied = fs::read_dir(&self.output_dir).is_ok_and(|mut entries| entries.next().is_some());
        if occupied {
            return Err(RuntimeError::OutputExists {
                path: self.output_dir.clone(),
            });
        }
        Ok(())
    }

    /// Map a path under the work directory to its published location.
    pub fn published_path(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.work_dir) {
            Ok(rel) => self.output_dir.join(rel),
            Err(_) => path.to_path_buf(),
        }
    }

    /// Write POD pages, the index and `run_records.json`, then publish.
    ///
    /// `records` are rewritten to point at published paths.
    #[instrument(skip_all, fields(output = %self.output_dir.display()))]
    pub fn package(
        &self,
        config: &Config,
        records: &mut [RunRecord],
        manifests: &HashMap<String, PodManifest>,
    ) -> Result<PathBuf> {
        for record in records.iter() {
            let Some(case) = config.case_list.iter().find(|c| c.name == record.case) else {
                continue;
            };
            self.write_pod_page(record, manifests.get(&record.pod), case)?;
        }
        for record in records.iter_mut() {
            record.log_path = record.log_path.as_deref().map(|p| self.published_path(p));
        }
        self.write_index(config, records, manifests)?;

        let published = self.publish()?;
        if self.make_tar {
            self.archive()?;
        }
        self.cleanup();
        Ok(published)
    }

    /// `<WORK_DIR>/<case>/<pod>/<pod>.html`
    pub fn write_pod_page(
        &self,
        record: &RunRecord,
        manifest: Option<&PodManifest>,
        case: &CaseConfig,
    ) -> Result<PathBuf> {
        let dir = self.work_dir.join(&record.case).join(&record.pod);
        fs::create_dir_all(&dir).map_err(|e| RuntimeError::io(&dir, e))?;
        let page = dir.join(format!("{}.html", record.pod));

        let html = if record.status == RunStatus::Succeeded {
            let template = manifest.map(|m| m.home.join(format!("{}.html", m.name)));
            match template.filter(|t| t.is_file()) {
                Some(template) => {
                    let text =
                        fs::read_to_string(&template).map_err(|e| RuntimeError::io(&template, e))?;
                    html::render_template(&text, case)
                }
                None => html::figures_page(record, manifest, case),
            }
        } else {
            html::error_page(record, manifest, case)
        };
        fs::write(&page, html).map_err(|e| RuntimeError::io(&page, e))?;
        debug!(pod = %record.pod, case = %record.case, page = %page.display(), "wrote POD page");
        Ok(page)
    }

    /// `index.html` and `run_records.json` at the top of the work directory.
    /// Sections follow the case list; entries follow each case's POD list.
    pub fn write_index(
        &self,
        config: &Config,
        records: &[RunRecord],
        manifests: &HashMap<String, PodManifest>,
    ) -> Result<()> {
        fs::create_dir_all(&self.work_dir).map_err(|e| RuntimeError::io(&self.work_dir, e))?;
        let sections: Vec<(&CaseConfig, Vec<IndexEntry<'_>>)> = config
            .case_list
            .iter()
            .map(|case| {
                let entries = case
                    .pods(&config.pod_list)
                    .iter()
                    .filter_map(|pod| records.iter().find(|r| r.case == case.name && &r.pod == pod))
                    .map(|record| IndexEntry {
                        record,
                        long_name: manifests
                            .get(&record.pod)
                            .map(|m| m.settings.long_name.clone())
                            .filter(|n| !n.is_empty())
                            .unwrap_or_else(|| record.pod.clone()),
                    })
                    .collect();
                (case, entries)
            })
            .collect();

        let index = self.work_dir.join(INDEX_FILE);
        fs::write(&index, html::index_page(&config.run_id, &sections))
            .map_err(|e| RuntimeError::io(&index, e))?;
        write_records(&self.work_dir.join(RECORDS_FILE), records)?;
        info!(index = %index.display(), records = records.len(), "wrote run report");
        Ok(())
    }

    /// Copy the work tree (minus preprocessed inputs) into the output
    /// directory, swapping out any previous output.
    pub fn publish(&self) -> Result<PathBuf> {
        self.check_destination()?;
        if let Some(parent) = self.output_dir.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| RuntimeError::io(parent, e))?;
        }
        let staging = sibling(&self.output_dir, ".staging");
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|e| RuntimeError::io(&staging, e))?;
        }
        copy_tree(&self.work_dir, &staging)?;

        if self.output_dir.exists() {
            let previous = sibling(&self.output_dir, ".old");
            if previous.exists() {
                fs::remove_dir_all(&previous).map_err(|e| RuntimeError::io(&previous, e))?;
            }
            fs::rename(&self.output_dir, &previous)
                .map_err(|e| RuntimeError::io(&self.output_dir, e))?;
            if let Err(e) = fs::rename(&staging, &self.output_dir) {
                if let Err(restore) = fs::rename(&previous, &self.output_dir) {
                    warn!(
                        output = %self.output_dir.display(),
                        "failed to restore previous output: {restore}"
                    );
                }
                return Err(RuntimeError::io(&self.output_dir, e));
            }
            if let Err(e) = fs::remove_dir_all(&previous) {
                warn!(path = %previous.display(), "failed to remove previous output: {e}");
            }
        } else {
            fs::rename(&staging, &self.output_dir)
                .map_err(|e| RuntimeError::io(&self.output_dir, e))?;
        }
        info!(output = %self.output_dir.display(), "published output");
        Ok(self.output_dir.clone())
    }

    /// `<OUTPUT_DIR>.tar`, without NetCDF files.
    pub fn archive(&self) -> Result<PathBuf> {
        let path = self.archive_path();
        let file = File::create(&path).map_err(|e| RuntimeError::io(&path, e))?;
        let mut builder = tar::Builder::new(file);
        let root = self
            .output_dir
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("output"));

        for entry in WalkDir::new(&self.output_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let at = e.path().unwrap_or(self.output_dir.as_path()).to_path_buf();
                RuntimeError::io(at, e.into())
            })?;
            let Ok(rel) = entry.path().strip_prefix(&self.output_dir) else {
                continue;
            };
            let name = root.join(rel);
            let result = if entry.file_type().is_dir() {
                builder.append_dir(&name, entry.path())
            } else if is_netcdf(entry.path()) {
                continue;
            } else {
                builder.append_path_with_name(entry.path(), &name)
            };
            result.map_err(|e| RuntimeError::io(entry.path(), e))?;
        }
        builder
            .into_inner()
            .map_err(|e| RuntimeError::io(&path, e))?;
        info!(archive = %path.display(), "wrote archive");
        Ok(path)
    }

    /// Remove the work directory unless asked to keep it.
    pub fn cleanup(&self) {
        if self.keep_temp {
            debug!(work = %self.work_dir.display(), "keeping work directory");
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.work_dir) {
            warn!(work = %self.work_dir.display(), "failed to remove work directory: {e}");
        }
    }
}

fn is_netcdf(path: &Path) -> bool {
    path.extension().is_some_and(|x| x == "nc")
}

/// `<case>/inputs/...` relative to the work root.
fn is_inputs(rel: &Path) -> bool {
    let mut parts = rel.components();
    matches!(
        (parts.next(), parts.next()),
        (Some(Component::Normal(_)), Some(Component::Normal(dir))) if dir == INPUTS_DIR
    )
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to).map_err(|e| RuntimeError::io(to, e))?;
    let walker = WalkDir::new(from)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.path().strip_prefix(from).map_or(true, |rel| !is_inputs(rel)));
    for entry in walker {
        let entry = entry.map_err(|e| {
            let at = e.path().unwrap_or(from).to_path_buf();
            RuntimeError::io(at, e.into())
        })?;
        let Ok(rel) = entry.path().strip_prefix(from) else {
            continue;
        };
        let target = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| RuntimeError::io(&target, e))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target).map_err(|e| RuntimeError::io(entry.path(), e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdtf_settings::EnvSnapshot;
    use std::io::Read;

    fn config(root: &Path, overwrite: bool, make_tar: bool) -> Config {
        let text = format!(
            r#"{{
                "run_id": "test",
                "case_list": [{{ "CASENAME": "CM4_hist", "FIRSTYR": 1990, "LASTYR": 1999 }}],
                "pod_list": ["example", "blocking"],
                "paths": {{
                    "OBS_DATA": "{0}/obs", "MODEL_DATA": "{0}/model", "WORK_DIR": "{0}/work",
                    "OUTPUT_DIR": "{0}/out", "POD_ROOT": "{0}/pods"
                }},
                "settings": {{
                    "overwrite": {overwrite}, "make_tar": {make_tar},
                    "environment": {{ "manager": "none" }}
                }}
            }}"#,
            root.display()
        );
        Config::parse(&root.join("config.jsonc"), &text, &EnvSnapshot::default()).unwrap()
    }

    fn populate_work(work: &Path) -> Vec<RunRecord> {
        let pod_dir = work.join("CM4_hist/example");
        fs::create_dir_all(pod_dir.join("model/PS")).unwrap();
        fs::write(pod_dir.join("model/PS/fig.eps"), "eps").unwrap();
        fs::write(pod_dir.join("model/out.nc"), "netcdf").unwrap();
        fs::write(pod_dir.join("example.log"), "log").unwrap();
        fs::create_dir_all(work.join("CM4_hist/inputs/mon")).unwrap();
        fs::write(work.join("CM4_hist/inputs/mon/CM4_hist.zg.mon.nc"), "input").unwrap();

        let mut ok = RunRecord::new("example", "CM4_hist", RunStatus::Succeeded);
        ok.log_path = Some(pod_dir.join("example.log"));
        ok.figures = vec![PathBuf::from("model/PS/fig.eps")];
        let skipped = RunRecord::new("blocking", "CM4_hist", RunStatus::SkippedMissingData);
        // stored out of order on purpose
        vec![skipped, ok]
    }

    #[test]
    fn package_publishes_without_inputs_and_tars_without_netcdf() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), false, true);
        let mut records = populate_work(&config.paths.work_dir);
        let packager = Packager::new(&config);
        packager.check_destination().unwrap();

        let out = packager.package(&config, &mut records, &HashMap::new()).unwrap();

        assert!(out.join("index.html").is_file());
        assert!(out.join("run_records.json").is_file());
        assert!(out.join("CM4_hist/example/example.html").is_file());
        assert!(out.join("CM4_hist/blocking/blocking.html").is_file());
        assert!(out.join("CM4_hist/example/model/out.nc").is_file());
        assert!(!out.join("CM4_hist/inputs").exists());
        assert!(!config.paths.work_dir.exists());
        assert_eq!(
            records[1].log_path.as_deref(),
            Some(out.join("CM4_hist/example/example.log").as_path())
        );

        let index = fs::read_to_string(out.join("index.html")).unwrap();
        assert!(index.find("example/example.html").unwrap() < index.find("blocking/blocking.html").unwrap());

        let mut archive = tar::Archive::new(File::open(packager.archive_path()).unwrap());
        let mut names = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let mut sink = Vec::new();
            entry.read_to_end(&mut sink).unwrap();
            names.push(entry.path().unwrap().to_string_lossy().into_owned());
        }
        assert!(names.iter().any(|n| n == "out/CM4_hist/example/model/PS/fig.eps"));
        assert!(names.iter().all(|n| !n.ends_with(".nc")));
    }

    #[test]
    fn existing_output_needs_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), false, false);
        fs::create_dir_all(config.paths.output_dir.join("old")).unwrap();
        let err = Packager::new(&config).check_destination().unwrap_err();
        assert_eq!(err.kind().code(), "E008");

        let config = config.with_overrides(mdtf_settings::Overrides {
            overwrite: true,
            ..Default::default()
        });
        let mut records = populate_work(&config.paths.work_dir);
        let out = Packager::new(&config)
            .package(&config, &mut records, &HashMap::new())
            .unwrap();
        assert!(!out.join("old").exists());
        assert!(out.join("index.html").is_file());
        assert!(!sibling(&out, ".old").exists());
    }
}
