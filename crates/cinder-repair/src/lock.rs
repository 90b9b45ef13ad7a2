//! Single-writer guard on a storage tree.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{RepairError, RepairResult};

pub const LOCK_FILE_NAME: &str = ".cinder.lock";

/// Exclusive advisory lock held for the lifetime of the value.
#[derive(Debug)]
pub struct StorageLock {
    file: File,
    path: PathBuf,
}

impl StorageLock {
    /// Lock `storage_dir`, creating it if needed. Fails immediately if
    /// another process already holds the lock.
    pub fn acquire(storage_dir: &Path) -> RepairResult<Self> {
        fs::create_dir_all(storage_dir).map_err(|source| RepairError::Io {
            path: storage_dir.to_path_buf(),
            source,
        })?;

        let path = storage_dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| RepairError::Io {
                path: path.clone(),
                source,
            })?;
        file.try_lock_exclusive()
            .map_err(|source| RepairError::Locked {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), "storage lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StorageLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release storage lock");
        }
    }
}
