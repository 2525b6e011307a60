//! Exclusive-create lock files next to preprocessed outputs.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Held while an output is being written; removes the lock file on drop.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub fn lock_path(output: &Path) -> PathBuf {
        let mut name = output.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Block until the lock for `output` is ours.
    ///
    /// Returns the guard and whether another holder had to be waited for.
    /// A lock file older than `stale_after` is removed.
    pub fn acquire(output: &Path, stale_after: Duration) -> io::Result<(FileLock, bool)> {
        let path = Self::lock_path(output);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut waited = false;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id())?;
                    debug!(lock = %path.display(), "lock acquired");
                    return Ok((FileLock { path }, waited));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if is_stale(&path, stale_after) {
                        warn!(lock = %path.display(), "breaking stale lock");
                        match fs::remove_file(&path) {
                            Ok(()) => continue,
                            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                            Err(e) => return Err(e),
                        }
                    }
                    waited = true;
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    let Ok(modified) = fs::metadata(path).and_then(|m| m.modified()) else {
        return false;
    };
    SystemTime::now()
        .duration_since(modified)
        .is_ok_and(|age| age > stale_after)
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), "failed to remove lock: {e}");
        }
    }
}
