//! Settings loading errors

use std::io;
use std::path::PathBuf;

use mdtf_foundation::ErrorKind;
use thiserror::Error;

/// Settings result type
pub type Result<T> = std::result::Result<T, SettingsError>;

/// Errors raised while loading configuration, manifests and field lists
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("{path}:{line}:{column}: {message}\n{snippet}")]
    Syntax {
        path: PathBuf,
        line: usize,
        column: usize,
        message: String,
        snippet: String,
    },

    #[error("{path}: {message}")]
    Schema { path: PathBuf, message: String },

    #[error("{path}: environment variable '{name}' is not set (referenced at {json_path})")]
    UnresolvedVariable {
        path: PathBuf,
        name: String,
        json_path: String,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SettingsError {
    pub fn schema(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        SettingsError::Schema {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Stable classification for run records and exit codes.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SettingsError::Syntax { .. } => ErrorKind::ConfigSyntax,
            SettingsError::Schema { .. } | SettingsError::UnresolvedVariable { .. } => {
                ErrorKind::ConfigSchema
            }
            SettingsError::Io { .. } => ErrorKind::Filesystem,
        }
    }
}
