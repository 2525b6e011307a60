//! Process spawning abstraction for POD drivers.
//!
//! The runner only sees a [`PodSpawner`]; production code uses
//! [`RealPodSpawner`] and tests swap in [`mock::MockPodSpawner`] to control
//! exit codes and hangs without real POD code.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::environment::PodEnvironment;

/// Everything needed to start one POD driver.
#[derive(Debug, Clone)]
pub struct PodCommand {
    pub pod: String,
    pub case: String,
    /// Passed to `bash -c`.
    pub script: String,
    pub env: PodEnvironment,
    pub cwd: PathBuf,
    /// stdout and stderr are both appended here.
    pub log: PathBuf,
}

/// Trait for spawning POD driver processes.
pub trait PodSpawner: Send + Sync {
    /// Start the driver. The returned child is owned by the caller, which
    /// waits for it or kills it. On unix the child leads its own process
    /// group.
    fn spawn(&self, command: &PodCommand) -> Result<Child, String>;
}

/// Runs `bash -c <script>` with the POD environment layered over the
/// inherited one.
pub struct RealPodSpawner;

impl PodSpawner for RealPodSpawner {
    fn spawn(&self, command: &PodCommand) -> Result<Child, String> {
        launch(&command.script, command)
    }
}

fn launch(script: &str, command: &PodCommand) -> Result<Child, String> {
    let stdout = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&command.log)
        .map_err(|e| format!("failed to open log {}: {e}", command.log.display()))?;
    let stderr = stdout
        .try_clone()
        .map_err(|e| format!("failed to duplicate log handle: {e}"))?;

    let mut bash = Command::new("bash");
    bash.arg("-c")
        .arg(script)
        .current_dir(&command.cwd)
        .envs(command.env.iter())
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true);
    // own group, so a kill reaches everything the driver starts
    #[cfg(unix)]
    bash.process_group(0);
    bash.spawn()
        .map_err(|e| format!("failed to spawn bash for POD '{}': {e}", command.pod))
}

pub mod mock {
    //! Mock spawner for tests.
    //!
    //! Available to integration tests and the `mdtf-tests` crate. Mock
    //! drivers are still real `bash` processes, so exit codes, logs and
    //! kills behave as in production.

    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Behavior of a mocked POD driver.
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Print a line and exit with `code`
        Exit { code: i32 },
        /// Run an arbitrary script in the POD work directory
        Script { script: String },
        /// Never exit on its own (timeout and interrupt scenarios)
        Hang,
        /// Spawn fails immediately
        SpawnFails { error: String },
    }

    impl MockBehavior {
        fn script(&self) -> Result<String, String> {
            match self {
                MockBehavior::Exit { code } => {
                    Ok(format!("echo \"mock driver for $CASENAME\"; exit {code}"))
                }
                MockBehavior::Script { script } => Ok(script.clone()),
                MockBehavior::Hang => Ok("exec sleep 3600".to_string()),
                MockBehavior::SpawnFails { error } => Err(error.clone()),
            }
        }
    }

    #[derive(Debug, Clone)]
    pub struct SpawnedPod {
        pub pod: String,
        pub case: String,
        /// The command the real spawner would have run.
        pub script: String,
        pub env: PodEnvironment,
    }

    /// Mock spawner with a default behavior and per-POD overrides.
    pub struct MockPodSpawner {
        default: Arc<Mutex<MockBehavior>>,
        per_pod: Arc<Mutex<HashMap<String, MockBehavior>>>,
        spawned: Arc<Mutex<Vec<SpawnedPod>>>,
    }

    impl MockPodSpawner {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                default: Arc::new(Mutex::new(behavior)),
                per_pod: Arc::new(Mutex::new(HashMap::new())),
                spawned: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Override the behavior for one POD.
        pub fn with_pod(self, pod: &str, behavior: MockBehavior) -> Self {
            self.set_pod_behavior(pod, behavior);
            self
        }

        pub fn set_pod_behavior(&self, pod: &str, behavior: MockBehavior) {
            self.per_pod
                .lock()
                .expect("MockPodSpawner per_pod mutex poisoned")
                .insert(pod.to_string(), behavior);
        }

        /// Changes the default behavior (for multi-stage tests).
        pub fn set_behavior(&self, behavior: MockBehavior) {
            *self.default.lock().expect("MockPodSpawner behavior mutex poisoned") = behavior;
        }

        /// Spawn attempts in the order they were made.
        pub fn spawned(&self) -> Vec<SpawnedPod> {
            self.spawned
                .lock()
                .expect("MockPodSpawner spawned mutex poisoned")
                .clone()
        }
    }

    impl PodSpawner for MockPodSpawner {
        fn spawn(&self, command: &PodCommand) -> Result<Child, String> {
            self.spawned
                .lock()
                .expect("MockPodSpawner spawned mutex poisoned")
                .push(SpawnedPod {
                    pod: command.pod.clone(),
                    case: command.case.clone(),
                    script: command.script.clone(),
                    env: command.env.clone(),
                });

            let behavior = self
                .per_pod
                .lock()
                .expect("MockPodSpawner per_pod mutex poisoned")
                .get(&command.pod)
                .cloned()
                .unwrap_or_else(|| {
                    self.default
                        .lock()
                        .expect("MockPodSpawner behavior mutex poisoned")
                        .clone()
                });

            launch(&behavior.script()?, command)
        }
    }
}
