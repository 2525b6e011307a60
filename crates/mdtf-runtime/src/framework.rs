//! One framework run: catalog, resolve, preprocess, run and package every
//! POD of every case.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mdtf_data::{
    Catalog, CatalogBuilder, DatasetStore, PreprocessPlan, Preprocessor, Resolution, Resolver,
};
use mdtf_foundation::{ErrorKind, Reason};
use mdtf_settings::{CaseConfig, Config, EnvSnapshot, FieldList, PodManifest};
use tracing::{error, info, instrument, warn};

use crate::environment::{EnvironmentManager, ExportedVariable, PodEnvironment};
use crate::error::Result;
use crate::packager::Packager;
use crate::record::{RunRecord, RunStatus};
use crate::runner::{PodRunner, RunJob};
use crate::scheduler::{Scheduler, Shutdown, Terminate};
use crate::spawner::{PodCommand, PodSpawner};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_CONFIG: i32 = 1;
pub const EXIT_NO_DATA: i32 = 2;
pub const EXIT_POD_FAILED: i32 = 3;
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug)]
pub struct RunSummary {
    /// Case-list order, then POD-list order within each case.
    pub records: Vec<RunRecord>,
    pub interrupted: bool,
    pub output: PathBuf,
}

impl RunSummary {
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            EXIT_INTERRUPTED
        } else if self.records.iter().any(|r| r.status == RunStatus::Failed) {
            EXIT_POD_FAILED
        } else if !self.records.is_empty() && self.records.iter().all(|r| r.status.is_skipped()) {
            EXIT_NO_DATA
        } else {
            EXIT_SUCCESS
        }
    }

    pub fn count(&self, status: RunStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }
}

/// A POD resolved against one case, waiting for a worker.
struct PodJob {
    case: CaseConfig,
    manifest: PodManifest,
    resolution: Resolution,
    /// Set when the case as a whole has no usable catalog.
    blocked: Option<Reason>,
}

/// Shared by every worker task.
struct JobContext {
    config: Config,
    preprocessor: Preprocessor,
    runner: PodRunner,
    environments: EnvironmentManager,
}

pub struct Framework {
    config: Config,
    env: EnvSnapshot,
    store: Arc<dyn DatasetStore>,
    spawner: Arc<dyn PodSpawner>,
    environments: EnvironmentManager,
}

impl Framework {
    pub fn new(
        config: Config,
        env: EnvSnapshot,
        store: Arc<dyn DatasetStore>,
        spawner: Arc<dyn PodSpawner>,
    ) -> Self {
        let environments = EnvironmentManager::new(&config.settings.environment);
        Self {
            config,
            env,
            store,
            spawner,
            environments,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Load every manifest named in the configuration. An unknown POD is a
    /// configuration error.
    pub fn load_manifests(&self) -> Result<HashMap<String, PodManifest>> {
        let mut manifests = HashMap::new();
        for pod in self.config.all_pods() {
            let manifest = PodManifest::load(&self.config.paths.pod_root, pod, &self.env)?;
            manifests.insert(pod.to_string(), manifest);
        }
        Ok(manifests)
    }

    async fn catalog(&self, case: &CaseConfig, field_list: Option<&FieldList>) -> std::result::Result<Catalog, Reason> {
        if let Some(table) = case.catalog.clone() {
            return tokio::task::spawn_blocking(move || Catalog::load(&table))
                .await
                .map_err(|e| Reason::new(ErrorKind::CatalogParse, e.to_string()))?
                .map_err(|e| Reason::new(e.kind(), e.to_string()));
        }
        let mut builder = CatalogBuilder::new(
            case.root(&self.config.paths),
            case.catalog_style,
            Arc::clone(&self.store),
        );
        if let Some(field_list) = field_list {
            builder = builder.with_field_list(field_list.clone());
        }
        tokio::task::spawn_blocking(move || builder.build())
            .await
            .map_err(|e| Reason::new(ErrorKind::CatalogParse, e.to_string()))?
            .map_err(|e| Reason::new(e.kind(), e.to_string()))
    }

    /// Run everything and package the output.
    ///
    /// Configuration and filesystem problems are returned as errors; all
    /// per-POD problems end up in the summary's records.
    #[instrument(skip_all, fields(run_id = %self.config.run_id))]
    pub async fn run(&self, shutdown: Arc<Shutdown>) -> Result<RunSummary> {
        let config = &self.config;
        let packager = Packager::new(config);
        packager.check_destination()?;
        let manifests = self.load_manifests()?;
        let field_list = match &config.paths.field_list {
            Some(path) => Some(FieldList::load(path, &self.env)?),
            None => None,
        };

        let mut jobs = Vec::new();
        for case in &config.case_list {
            let catalog = self.catalog(case, field_list.as_ref()).await;
            match &catalog {
                Ok(catalog) => info!(
                    case = %case.name,
                    entries = catalog.len(),
                    invalid = catalog.invalid().len(),
                    "catalog ready"
                ),
                Err(reason) => error!(case = %case.name, "no usable catalog: {reason}"),
            }
            for pod in case.pods(&config.pod_list) {
                let Some(manifest) = manifests.get(pod) else {
                    continue;
                };
                let (resolution, blocked) = match &catalog {
                    Ok(catalog) => (Resolver::new(catalog, manifest, case).resolve(), None),
                    Err(reason) => (
                        Resolution {
                            pod: pod.clone(),
                            case: case.name.clone(),
                            variables: Vec::new(),
                        },
                        Some(reason.clone()),
                    ),
                };
                jobs.push(PodJob {
                    case: case.clone(),
                    manifest: manifest.clone(),
                    resolution,
                    blocked,
                });
            }
        }
        let order: Vec<(String, String)> = jobs
            .iter()
            .map(|j| (j.manifest.name.clone(), j.case.name.clone()))
            .collect();

        let runner = PodRunner::new(Arc::clone(&self.spawner))
            .with_test_mode(config.settings.test_mode)
            .with_timeout(config.settings.timeout_secs.map(Duration::from_secs))
            .with_escape_policy(config.settings.output_escape_policy);
        let context = Arc::new(JobContext {
            config: config.clone(),
            preprocessor: Preprocessor::new(Arc::clone(&self.store), &config.paths.work_dir),
            runner,
            environments: self.environments.clone(),
        });

        let results = Scheduler::new(config.settings.num_workers)
            .run(jobs, &shutdown, |job, terminate| {
                let context = Arc::clone(&context);
                async move { execute(&context, job, terminate).await }
            })
            .await;

        let mut records: Vec<RunRecord> = results
            .into_iter()
            .zip(order)
            .map(|(record, (pod, case))| {
                record.unwrap_or_else(|| {
                    RunRecord::not_run(
                        &pod,
                        &case,
                        RunStatus::Cancelled,
                        Reason::new(ErrorKind::PodExecution, "not started: run interrupted"),
                    )
                })
            })
            .collect();
        let interrupted = shutdown.is_stopping();

        let output = packager.package(config, &mut records, &manifests)?;
        let summary = RunSummary {
            records,
            interrupted,
            output,
        };
        info!(
            succeeded = summary.count(RunStatus::Succeeded),
            failed = summary.count(RunStatus::Failed),
            skipped = summary.records.iter().filter(|r| r.status.is_skipped()).count(),
            interrupted,
            "run finished"
        );
        Ok(summary)
    }
}

fn skipped(mut record: RunRecord, status: RunStatus, reason: Reason) -> RunRecord {
    warn!(pod = %record.pod, case = %record.case, "skipping POD: {reason}");
    record.status = status;
    record.reason = Some(reason);
    record
}

fn unresolved(resolution: &Resolution) -> Reason {
    resolution.blocking_reason().cloned().unwrap_or_else(|| {
        Reason::new(
            ErrorKind::VarlistUnresolved,
            format!("POD '{}': required variables unavailable", resolution.pod),
        )
    })
}

async fn execute(context: &JobContext, job: PodJob, terminate: Terminate) -> RunRecord {
    let PodJob {
        case,
        manifest,
        mut resolution,
        blocked,
    } = job;
    let record = RunRecord::new(&manifest.name, &case.name, RunStatus::SkippedMissingData)
        .with_variables(&resolution);
    if let Some(reason) = blocked {
        return skipped(record, RunStatus::SkippedMissingData, reason);
    }
    if !resolution.is_runnable() {
        let reason = unresolved(&resolution);
        return skipped(record, RunStatus::SkippedMissingData, reason);
    }

    let mut exported = Vec::new();
    for variable in resolution.variables.iter_mut() {
        if !variable.status.is_available() {
            continue;
        }
        let Some(plan) = PreprocessPlan::for_variable(&case, variable) else {
            continue;
        };
        let preprocessor = context.preprocessor.clone();
        let outcome = tokio::task::spawn_blocking(move || preprocessor.run(&plan)).await;
        let name = variable.entry.var_name.clone();
        match outcome {
            Ok(Ok(file)) => exported.push(ExportedVariable { var_name: name, file }),
            Ok(Err(e)) => {
                warn!(pod = %manifest.name, var = %name, "preprocessing failed: {e}");
                variable.mark_missing(Reason::new(e.kind(), format!("{name}: {e}")));
            }
            Err(e) => {
                error!(pod = %manifest.name, var = %name, "preprocessing task failed: {e}");
                variable.mark_missing(Reason::new(ErrorKind::Preprocess, format!("{name}: {e}")));
            }
        }
    }
    let mut record = record.with_variables(&resolution);
    for variable in &exported {
        record.set_file(&variable.var_name, &variable.file);
    }
    if !resolution.is_runnable() {
        let reason = unresolved(&resolution);
        return skipped(record, RunStatus::SkippedMissingData, reason);
    }

    let script = match context.environments.command(&manifest) {
        Ok(script) => script,
        Err(e) => return skipped(record, RunStatus::SkippedEnvironment, e.reason()),
    };

    let paths = &context.config.paths;
    let case_dir = paths.work_dir.join(&case.name);
    let work_dir = case_dir.join(&manifest.name);
    let mut exclude = vec![PreprocessPlan::inputs_dir(&paths.work_dir, &case.name)];
    exclude.extend(
        case.pods(&context.config.pod_list)
            .iter()
            .filter(|p| **p != manifest.name)
            .map(|p| case_dir.join(p)),
    );

    let env = PodEnvironment::build(&case, paths, &manifest, &work_dir, &exported);
    let job = RunJob {
        command: PodCommand {
            pod: manifest.name.clone(),
            case: case.name.clone(),
            script,
            env,
            log: work_dir.join(format!("{}.log", manifest.name)),
            cwd: work_dir,
        },
        driver: manifest.driver_path(),
        case_dir,
        exclude,
        record,
    };
    context.runner.run(job, terminate).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(statuses: &[RunStatus], interrupted: bool) -> RunSummary {
        RunSummary {
            records: statuses
                .iter()
                .enumerate()
                .map(|(i, s)| RunRecord::new(&format!("pod{i}"), "case", *s))
                .collect(),
            interrupted,
            output: PathBuf::from("out"),
        }
    }

    #[test]
    fn exit_codes() {
        use RunStatus::*;
        assert_eq!(summary(&[Succeeded, SkippedMissingData], false).exit_code(), EXIT_SUCCESS);
        assert_eq!(summary(&[SkippedMissingData, SkippedEnvironment], false).exit_code(), EXIT_NO_DATA);
        assert_eq!(summary(&[Succeeded, Failed, SkippedMissingData], false).exit_code(), EXIT_POD_FAILED);
        assert_eq!(summary(&[Failed, Cancelled], true).exit_code(), EXIT_INTERRUPTED);
        assert_eq!(summary(&[], false).exit_code(), EXIT_SUCCESS);
    }
}
