//! Errors raised while running PODs and packaging their output.

use std::io;
use std::path::PathBuf;

use mdtf_data::{CatalogError, PreprocessError};
use mdtf_foundation::{ErrorKind, Reason};
use mdtf_settings::SettingsError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Preprocess(#[from] PreprocessError),

    #[error("environment '{name}' not found at {}", path.display())]
    EnvironmentNotFound { name: String, path: PathBuf },

    #[error("POD '{pod}' driver {}: {message}", driver.display())]
    Execution {
        pod: String,
        driver: PathBuf,
        exit_code: Option<i32>,
        message: String,
    },

    #[error("output directory {} already exists (pass --overwrite to replace it)", path.display())]
    OutputExists { path: PathBuf },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl RuntimeError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        RuntimeError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::Settings(e) => e.kind(),
            RuntimeError::Catalog(e) => e.kind(),
            RuntimeError::Preprocess(e) => e.kind(),
            RuntimeError::EnvironmentNotFound { .. } => ErrorKind::EnvironmentNotFound,
            RuntimeError::Execution { .. } => ErrorKind::PodExecution,
            RuntimeError::OutputExists { .. }
            | RuntimeError::Io { .. }
            | RuntimeError::Json { .. } => ErrorKind::Filesystem,
        }
    }

    /// The error as a run-record reason.
    pub fn reason(&self) -> Reason {
        Reason::new(self.kind(), self.to_string())
    }
}
