//! core::ops::lock
//!
//! Exclusive process lock on a workspace data directory.
//!
//! # Architecture
//!
//! Only one `cw` process may load, mutate, and save a data directory at a
//! time. In-process concurrency is handled by the store `RwLock`s and
//! leases; this lock is only about processes.
//!
//! # Storage
//!
//! - `<data_dir>/lock` - Lock file with OS-level exclusive lock
//!
//! # Invariants
//!
//! - Lock is held from load until the last snapshot write
//! - Lock is released on drop
//! - Acquisition is non-blocking
//!
//! # Example
//!
//! ```
//! use casework::core::ops::lock::DataDirLock;
//! use casework::core::paths::DataPaths;
//!
//! let dir = tempfile::TempDir::new().unwrap();
//! let paths = DataPaths::new(dir.path().to_path_buf());
//! let lock = DataDirLock::acquire(&paths).unwrap();
//! assert!(lock.is_held());
//! ```

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

use crate::core::paths::DataPaths;

/// Errors from locking operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process already holds the lock.
    #[error("data directory is locked by another casework process")]
    AlreadyLocked,

    #[error("failed to create lock: {0}")]
    CreateFailed(String),

    #[error("failed to acquire lock: {0}")]
    AcquireFailed(String),

    #[error("failed to release lock: {0}")]
    ReleaseFailed(String),
}

/// An exclusive lock on a data directory.
#[derive(Debug)]
pub struct DataDirLock {
    path: PathBuf,
    /// Some while the lock is held.
    file: Option<File>,
}

impl DataDirLock {
    /// Attempt to acquire the data directory lock.
    ///
    /// Creates the directory if needed. Fails fast with
    /// [`LockError::AlreadyLocked`] if another process holds it.
    pub fn acquire(paths: &DataPaths) -> Result<Self, LockError> {
        fs::create_dir_all(paths.root()).map_err(|e| {
            LockError::CreateFailed(format!("cannot create {}: {}", paths.root().display(), e))
        })?;

        let path = paths.lock_path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                LockError::CreateFailed(format!("cannot open {}: {}", path.display(), e))
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                path,
                file: Some(file),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(LockError::AlreadyLocked),
            Err(e) => Err(LockError::AcquireFailed(e.to_string())),
        }
    }

    /// Like [`acquire`](Self::acquire), but `None` when already held.
    pub fn try_acquire(paths: &DataPaths) -> Result<Option<Self>, LockError> {
        match Self::acquire(paths) {
            Ok(lock) => Ok(Some(lock)),
            Err(LockError::AlreadyLocked) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock before drop.
    pub fn release(&mut self) -> Result<(), LockError> {
        if let Some(file) = self.file.take() {
            file.unlock()
                .map_err(|e| LockError::ReleaseFailed(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for DataDirLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
    }
}
