//! MDTF Runtime
//!
//! Everything after varlist resolution: preparing each POD's environment,
//! running its driver under supervision, scheduling PODs over a bounded
//! worker pool, and packaging logs, figures and HTML into the output
//! directory.
//!
//! [`framework::Framework`] ties the data and runtime stages together for
//! one configuration.

pub mod environment;
pub mod error;
pub mod framework;
pub mod html;
pub mod packager;
pub mod record;
pub mod runner;
pub mod scheduler;
pub mod spawner;

pub use environment::{EnvironmentManager, ExportedVariable, PodEnvironment};
pub use error::{Result, RuntimeError};
pub use framework::{
    EXIT_CONFIG, EXIT_INTERRUPTED, EXIT_NO_DATA, EXIT_POD_FAILED, EXIT_SUCCESS, Framework,
    RunSummary,
};
pub use packager::Packager;
pub use record::{RunRecord, RunStatus, VariableSummary, read_records, write_records};
pub use runner::{PodRunner, RunJob};
pub use scheduler::{Scheduler, Shutdown, Terminate};
pub use spawner::{PodCommand, PodSpawner, RealPodSpawner};
