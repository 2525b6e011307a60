//! Running one POD driver to completion.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Local;
use mdtf_settings::OutputEscapePolicy;
use tokio::process::Child;
use tracing::{error, info, instrument, warn};
use walkdir::WalkDir;

use crate::error::RuntimeError;
use crate::record::{RunRecord, RunStatus};
use crate::scheduler::Terminate;
use crate::spawner::{PodCommand, PodSpawner};

pub const FIGURE_EXTENSIONS: &[&str] = &["png", "eps", "ps"];

/// How long to wait for a killed driver to be reaped.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Time between SIGTERM and SIGKILL to a driver's process group.
const TERM_GRACE: Duration = Duration::from_secs(2);

const MTIME_SLACK: Duration = Duration::from_millis(500);

/// One POD ready to run.
#[derive(Debug, Clone)]
pub struct RunJob {
    pub command: PodCommand,
    pub driver: PathBuf,
    /// `<WORK_DIR>/<case>`; the escape check looks here.
    pub case_dir: PathBuf,
    /// Directories under `case_dir` that do not count as escapes.
    pub exclude: Vec<PathBuf>,
    pub record: RunRecord,
}

#[derive(Debug)]
enum Outcome {
    Exited(Option<i32>),
    SpawnFailed(String),
    WaitFailed(String),
    TimedOut(Duration),
    Terminated,
}

impl Outcome {
    fn describe(&self) -> String {
        match self {
            Outcome::Exited(Some(code)) => format!("exit status {code}"),
            Outcome::Exited(None) => "terminated by signal".to_string(),
            Outcome::SpawnFailed(e) => format!("spawn failed: {e}"),
            Outcome::WaitFailed(e) => format!("wait failed: {e}"),
            Outcome::TimedOut(limit) => format!("timed out after {limit:?}"),
            Outcome::Terminated => "terminated after interrupt".to_string(),
        }
    }
}

pub struct PodRunner {
    spawner: Arc<dyn PodSpawner>,
    test_mode: bool,
    timeout: Option<Duration>,
    escape_policy: OutputEscapePolicy,
}

impl PodRunner {
    pub fn new(spawner: Arc<dyn PodSpawner>) -> Self {
        Self {
            spawner,
            test_mode: false,
            timeout: None,
            escape_policy: OutputEscapePolicy::default(),
        }
    }

    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_escape_policy(mut self, policy: OutputEscapePolicy) -> Self {
        self.escape_policy = policy;
        self
    }

    /// Run the driver and return the finished record.
    ///
    /// Never fails: every problem ends up in the record's status and reason.
    #[instrument(skip_all, fields(pod = %job.command.pod, case = %job.command.case))]
    pub async fn run(&self, job: RunJob, mut terminate: Terminate) -> RunRecord {
        let RunJob {
            command,
            driver,
            case_dir,
            exclude,
            mut record,
        } = job;
        record.status = RunStatus::Running;
        record.started = Some(Local::now());
        record.log_path = Some(command.log.clone());

        if let Err(e) = prepare(&command) {
            error!("could not prepare work directory: {e}");
            record.status = RunStatus::Failed;
            record.reason = Some(e.reason());
            record.finished = Some(Local::now());
            return record;
        }

        // file timestamps come from a coarse clock
        let since = SystemTime::now()
            .checked_sub(MTIME_SLACK)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let outcome = if self.test_mode {
            info!(command = %command.script, "test mode, not running driver");
            append_log(&command.log, &["test mode: driver not executed"]);
            Outcome::Exited(Some(0))
        } else {
            info!("starting driver");
            self.supervise(&command, &mut terminate).await
        };

        let finished = Local::now();
        append_log(
            &command.log,
            &[&format!("# finished: {}", finished.to_rfc3339()), &format!("# {}", outcome.describe())],
        );
        record.finished = Some(finished);

        let failure = |message: String, exit_code: Option<i32>| RuntimeError::Execution {
            pod: command.pod.clone(),
            driver: driver.clone(),
            exit_code,
            message,
        };
        match outcome {
            Outcome::Exited(Some(0)) => {
                record.status = RunStatus::Succeeded;
                record.exit_code = Some(0);
                record.figures = figures(&command.cwd);
                info!(figures = record.figures.len(), "POD succeeded");
            }
            Outcome::Exited(code) => {
                let err = failure(outcome.describe(), code);
                warn!("POD failed: {err}");
                record.status = RunStatus::Failed;
                record.exit_code = code;
                record.reason = Some(err.reason());
            }
            Outcome::Terminated => {
                let err = failure(outcome.describe(), None);
                warn!("POD cancelled");
                record.status = RunStatus::Cancelled;
                record.reason = Some(err.reason());
            }
            Outcome::SpawnFailed(_) | Outcome::WaitFailed(_) | Outcome::TimedOut(_) => {
                let err = failure(outcome.describe(), None);
                error!("POD failed: {err}");
                record.status = RunStatus::Failed;
                record.reason = Some(err.reason());
            }
        }

        if record.status == RunStatus::Succeeded {
            let escaped = escaped_files(&case_dir, &command.cwd, &exclude, since);
            if !escaped.is_empty() {
                let listed: Vec<String> = escaped.iter().map(|p| p.display().to_string()).collect();
                let message = format!(
                    "wrote {} file(s) outside its output directory: {}",
                    escaped.len(),
                    listed.join(", ")
                );
                match self.escape_policy {
                    OutputEscapePolicy::Warn => warn!("{message}"),
                    OutputEscapePolicy::Fail => {
                        error!("{message}");
                        record.status = RunStatus::Failed;
                        record.reason = Some(failure(message, Some(0)).reason());
                    }
                }
            }
        }
        record
    }

    async fn supervise(&self, command: &PodCommand, terminate: &mut Terminate) -> Outcome {
        let mut child = match self.spawner.spawn(command) {
            Ok(child) => child,
            Err(e) => return Outcome::SpawnFailed(e),
        };
        let limit = self.timeout;
        let deadline = async move {
            match limit {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };

        let stopped = tokio::select! {
            status = child.wait() => {
                return match status {
                    Ok(status) => Outcome::Exited(status.code()),
                    Err(e) => Outcome::WaitFailed(e.to_string()),
                };
            }
            _ = deadline => Outcome::TimedOut(limit.unwrap_or_default()),
            _ = terminate.wait() => Outcome::Terminated,
        };
        kill(&mut child, &command.pod).await;
        stopped
    }
}

/// Stop a driver and everything it started: SIGTERM to its process group,
/// then SIGKILL to whatever is left after [`TERM_GRACE`].
#[cfg(unix)]
async fn kill(child: &mut Child, pod: &str) {
    let Some(group) = child.id() else {
        return;
    };
    if let Err(e) = signal_group(group, libc::SIGTERM) {
        warn!(pod, "failed to terminate driver: {e}");
    }
    let exited = tokio::time::timeout(TERM_GRACE, child.wait()).await;
    if let Err(e) = signal_group(group, libc::SIGKILL) {
        warn!(pod, "failed to kill driver: {e}");
    }
    let status = match exited {
        Ok(status) => status,
        Err(_) => match tokio::time::timeout(KILL_WAIT, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                error!(pod, "driver did not exit within {KILL_WAIT:?} of kill");
                return;
            }
        },
    };
    match status {
        Ok(status) => info!(pod, "driver stopped: {status}"),
        Err(e) => warn!(pod, "error waiting for killed driver: {e}"),
    }
}

#[cfg(not(unix))]
async fn kill(child: &mut Child, pod: &str) {
    if let Err(e) = child.start_kill() {
        warn!(pod, "failed to kill driver: {e}");
        return;
    }
    match tokio::time::timeout(KILL_WAIT, child.wait()).await {
        Ok(Ok(status)) => info!(pod, "driver stopped: {status}"),
        Ok(Err(e)) => warn!(pod, "error waiting for killed driver: {e}"),
        Err(_) => error!(pod, "driver did not exit within {KILL_WAIT:?} of kill"),
    }
}

/// Send `signal` to process group `group`. An empty group is not an error.
#[cfg(unix)]
fn signal_group(group: u32, signal: libc::c_int) -> std::io::Result<()> {
    let group = libc::pid_t::try_from(group)
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
    // SAFETY: killpg takes plain integers and touches no memory of ours.
    if unsafe { libc::killpg(group, signal) } == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

fn prepare(command: &PodCommand) -> Result<(), RuntimeError> {
    fs::create_dir_all(&command.cwd).map_err(|e| RuntimeError::io(&command.cwd, e))?;
    let header = format!(
        "# POD: {}\n# case: {}\n# command: {}\n# started: {}\n",
        command.pod,
        command.case,
        command.script,
        Local::now().to_rfc3339()
    );
    fs::write(&command.log, header).map_err(|e| RuntimeError::io(&command.log, e))
}

fn append_log(log: &Path, lines: &[&str]) {
    let result = OpenOptions::new().append(true).open(log).and_then(|mut file| {
        for line in lines {
            writeln!(file, "{line}")?;
        }
        Ok(())
    });
    if let Err(e) = result {
        warn!(log = %log.display(), "failed to append to log: {e}");
    }
}

/// Figure files under `dir`, relative to it and sorted.
pub fn figures(dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|x| x.to_str())
                .is_some_and(|x| FIGURE_EXTENSIONS.contains(&x))
        })
        .filter_map(|e| e.path().strip_prefix(dir).ok().map(Path::to_path_buf))
        .collect();
    found.sort();
    found
}

/// Files under `case_dir` modified since `since` that are neither in
/// `own` nor in any of `exclude`.
fn escaped_files(case_dir: &Path, own: &Path, exclude: &[PathBuf], since: SystemTime) -> Vec<PathBuf> {
    let mut escaped: Vec<PathBuf> = WalkDir::new(case_dir)
        .into_iter()
        .filter_entry(|e| e.path() != own && !exclude.iter().any(|x| e.path() == x))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .is_some_and(|modified| modified >= since)
        })
        .map(|e| e.into_path())
        .collect();
    escaped.sort();
    escaped
}
