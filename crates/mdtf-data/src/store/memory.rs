//! In-memory dataset store for tests.
//!
//! Datasets live in a shared map keyed by absolute path. Writing also
//! creates a small placeholder file on disk so that directory walks,
//! existence checks and the output packager see the same tree a NetCDF
//! backend would produce.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{DatasetStore, Result, StoreError};
use crate::dataset::Dataset;

const PLACEHOLDER: &[u8] = b"in-memory dataset placeholder\n";

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    datasets: Arc<Mutex<HashMap<PathBuf, Dataset>>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(path: &Path) -> PathBuf {
        std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Dataset>> {
        self.datasets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of datasets written so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Number of successful writes, including rewrites of the same path.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains_key(&Self::key(path))
    }
}

impl DatasetStore for MemoryStore {
    fn read_header(&self, path: &Path) -> Result<Dataset> {
        self.read(path).map(|ds| ds.header())
    }

    fn read(&self, path: &Path) -> Result<Dataset> {
        if let Some(ds) = self.lock().get(&Self::key(path)) {
            return Ok(ds.clone());
        }
        if path.exists() {
            Err(StoreError::format(path, "not a dataset held by the in-memory store"))
        } else {
            Err(StoreError::NotFound {
                path: path.to_path_buf(),
            })
        }
    }

    fn write(&self, path: &Path, dataset: &Dataset) -> Result<()> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, PLACEHOLDER).map_err(io_err)?;
        self.lock().insert(Self::key(path), dataset.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).map_err(|source| StoreError::Io {
            path: to.to_path_buf(),
            source,
        })?;
        let mut datasets = self.lock();
        if let Some(dataset) = datasets.remove(&Self::key(from)) {
            datasets.insert(Self::key(to), dataset);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Variable;

    #[test]
    fn write_touches_file_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/x.nc");
        let store = MemoryStore::new();
        let ds = Dataset::new()
            .with_dim("time", 1)
            .with_variable(Variable::new("tas", &["time"]).with_data(vec![280.0]));
        store.write(&path, &ds).unwrap();
        assert!(path.is_file());
        assert_eq!(store.read(&path).unwrap(), ds);
        assert!(store.read_header(&path).unwrap().variable("tas").unwrap().data.is_none());
    }

    #[test]
    fn rename_moves_the_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let (from, to) = (dir.path().join("x.nc.tmp"), dir.path().join("x.nc"));
        let store = MemoryStore::new();
        let ds = Dataset::new().with_dim("time", 1);
        store.write(&from, &ds).unwrap();
        store.rename(&from, &to).unwrap();
        assert!(!from.exists() && !store.contains(&from));
        assert_eq!(store.read(&to).unwrap(), ds);
    }

    #[test]
    fn unknown_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        assert!(matches!(
            store.read(&dir.path().join("missing.nc")),
            Err(StoreError::NotFound { .. })
        ));
        let stray = dir.path().join("stray.nc");
        std::fs::write(&stray, b"junk").unwrap();
        assert!(matches!(store.read(&stray), Err(StoreError::Format { .. })));
    }
}
