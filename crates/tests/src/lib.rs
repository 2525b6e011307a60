//! Integration test harness for the MDTF framework.
//!
//! [`TestHarness`] lays out a throwaway tree (model data, POD manifests,
//! work and output directories) and runs the full pipeline against the
//! in-memory dataset store and the mock POD spawner:
//! Catalog → Resolve → Preprocess → Run → Package.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mdtf_data::{Dataset, DatasetStore, MemoryStore, Variable};
use mdtf_runtime::spawner::mock::{MockBehavior, MockPodSpawner};
use mdtf_runtime::{Framework, RunSummary, Shutdown};
use mdtf_settings::{Config, EnvSnapshot};
use serde_json::{Value, json};
use tempfile::TempDir;

/// Realm directory used for every generated asset.
pub const REALM: &str = "atmos";

/// One month per step on a noleap calendar, mid-month.
pub fn monthly_chunk(var: &str, units: &str, year: i32) -> Dataset {
    let times: Vec<f64> = (0..12).map(|m| (m * 30 + 15) as f64).collect();
    Dataset::new()
        .with_attr("source_id", "CM4")
        .with_attr("variant_label", "r1i1p1f1")
        .with_attr("grid_label", "gr1")
        .with_dim("time", 12)
        .with_variable(
            Variable::new("time", &["time"])
                .with_attr("units", format!("days since {year}-01-01").as_str())
                .with_attr("calendar", "noleap")
                .with_data(times),
        )
        .with_variable(
            Variable::new(var, &["time"])
                .with_attr("units", units)
                .with_attr("long_name", format!("{var} from CM4").as_str())
                .with_data((0..12).map(|m| (year - 1990) as f64 * 12.0 + m as f64).collect()),
        )
}

/// Test harness for end-to-end framework runs.
pub struct TestHarness {
    dir: TempDir,
    store: Arc<MemoryStore>,
    spawner: Arc<MockPodSpawner>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    /// Create an empty tree. Mock drivers exit 0 unless told otherwise.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        Self {
            dir,
            store: Arc::new(MemoryStore::new()),
            spawner: Arc::new(MockPodSpawner::new(MockBehavior::Exit { code: 0 })),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn spawner(&self) -> &MockPodSpawner {
        &self.spawner
    }

    pub fn work_dir(&self) -> PathBuf {
        self.root().join("work")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root().join("out")
    }

    pub fn model_root(&self, case: &str) -> PathBuf {
        self.root().join("model").join(case)
    }

    fn chunk_dir(&self, case: &str) -> PathBuf {
        self.model_root(case).join(REALM).join("ts").join("monthly").join("1yr")
    }

    /// Write one yearly chunk per entry of `years` under the case's DRS tree.
    ///
    /// # Panics
    ///
    /// Panics if the store rejects a write.
    pub fn add_monthly(&self, case: &str, var: &str, units: &str, years: &[i32]) -> Vec<PathBuf> {
        let dir = self.chunk_dir(case);
        years
            .iter()
            .map(|&year| {
                let path = dir.join(format!("{REALM}.{year}01-{year}12.{var}.nc"));
                self.store
                    .write(&path, &monthly_chunk(var, units, year))
                    .expect("Failed to write chunk");
                path
            })
            .collect()
    }

    /// Write `dataset` as `file_name` next to the monthly chunks.
    ///
    /// # Panics
    ///
    /// Panics if the store rejects the write.
    pub fn add_dataset(&self, case: &str, file_name: &str, dataset: &Dataset) -> PathBuf {
        let path = self.chunk_dir(case).join(file_name);
        self.store.write(&path, dataset).expect("Failed to write dataset");
        path
    }

    /// Write `<POD_ROOT>/<name>/settings.jsonc` with the given varlist
    /// (JSON object form) and an empty driver script.
    ///
    /// # Panics
    ///
    /// Panics if the files cannot be written.
    pub fn add_pod(&self, name: &str, varlist: Value) {
        let home = self.root().join("pods").join(name);
        fs::create_dir_all(&home).expect("Failed to create POD home");
        let manifest = json!({
            "settings": {
                "long_name": format!("{name} diagnostic"),
                "driver": format!("{name}.py"),
                "conda_env": "python3_base",
            },
            "varlist": varlist,
        });
        fs::write(
            home.join("settings.jsonc"),
            serde_json::to_string_pretty(&manifest).expect("manifest serializes"),
        )
        .expect("Failed to write manifest");
        fs::write(home.join(format!("{name}.py")), "# driver\n").expect("Failed to write driver");
    }

    /// Configuration text for one case and the given POD list. `settings`
    /// is merged over the defaults (no environment manager, one worker).
    pub fn config_text(&self, case: (&str, i32, i32), pods: &[&str], settings: Value) -> String {
        let mut merged = json!({ "environment": { "manager": "none" } });
        if let (Some(target), Value::Object(extra)) = (merged.as_object_mut(), settings) {
            target.extend(extra);
        }
        let config = json!({
            "run_id": "test",
            "case_list": [{ "CASENAME": case.0, "FIRSTYR": case.1, "LASTYR": case.2 }],
            "pod_list": pods,
            "paths": {
                "OBS_DATA": self.root().join("obs"),
                "MODEL_DATA": self.root().join("model"),
                "WORK_DIR": self.work_dir(),
                "OUTPUT_DIR": self.output_dir(),
                "POD_ROOT": self.root().join("pods"),
            },
            "settings": merged,
        });
        serde_json::to_string_pretty(&config).expect("config serializes")
    }

    /// Write `config.jsonc` and load it the way the CLI does.
    ///
    /// # Panics
    ///
    /// Panics if the configuration does not load.
    pub fn load_config(&self, text: &str) -> Config {
        let path = self.root().join("config.jsonc");
        fs::write(&path, text).expect("Failed to write config");
        Config::load(&path, &EnvSnapshot::default())
            .unwrap_or_else(|e| panic!("Config failed to load: {e}"))
    }

    pub fn framework(&self, config: Config) -> Framework {
        Framework::new(
            config,
            EnvSnapshot::default(),
            self.store.clone(),
            self.spawner.clone(),
        )
    }

    /// Run the whole pipeline.
    ///
    /// # Panics
    ///
    /// Panics if the run fails with a fatal error.
    pub async fn run(&self, config: Config) -> RunSummary {
        self.framework(config)
            .run(Arc::new(Shutdown::new()))
            .await
            .unwrap_or_else(|e| panic!("Run failed: {e}"))
    }
}
