//! Dataset storage abstraction.
//!
//! Everything that reads or writes model files goes through
//! [`DatasetStore`]. Production uses [`NetcdfStore`] (cargo feature
//! `netcdf`); tests use [`memory::MemoryStore`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mdtf_foundation::ErrorKind;
use thiserror::Error;

use crate::dataset::Dataset;

pub mod memory;
#[cfg(feature = "netcdf")]
pub mod netcdf;

pub use memory::MemoryStore;
#[cfg(feature = "netcdf")]
pub use self::netcdf::NetcdfStore;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{path}: no such dataset")]
    NotFound { path: PathBuf },

    #[error("{path}: {message}")]
    Format { path: PathBuf, message: String },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("built without NetCDF support (enable the `netcdf` feature)")]
    Unsupported,
}

impl StoreError {
    pub fn format(path: &Path, message: impl ToString) -> Self {
        StoreError::Format {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Io { .. } | StoreError::Unsupported => ErrorKind::Filesystem,
            StoreError::NotFound { .. } | StoreError::Format { .. } => ErrorKind::Preprocess,
        }
    }
}

/// Trait for reading and writing datasets.
///
/// Implementations must be safe to share across the worker pool.
pub trait DatasetStore: Send + Sync {
    /// Read metadata and coordinate values; data variables have no values.
    fn read_header(&self, path: &Path) -> Result<Dataset>;

    /// Read everything.
    fn read(&self, path: &Path) -> Result<Dataset>;

    /// Create or replace `path`.
    fn write(&self, path: &Path, dataset: &Dataset) -> Result<()>;

    /// Move a written dataset to `to`, replacing whatever is there.
    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).map_err(|source| StoreError::Io {
            path: to.to_path_buf(),
            source,
        })
    }
}

/// The store used by the binaries.
pub fn default_store() -> Result<Arc<dyn DatasetStore>> {
    #[cfg(feature = "netcdf")]
    {
        Ok(Arc::new(NetcdfStore))
    }
    #[cfg(not(feature = "netcdf"))]
    {
        Err(StoreError::Unsupported)
    }
}
