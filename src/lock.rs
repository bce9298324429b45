//! Cross-process request serialization via an advisory file lock.
//!
//! Every process pointed at the same lock path shares one exclusive
//! `flock(2)`, so only one request speaks at a time system-wide. The lock is
//! released when the guard drops, on every exit path, and by the kernel if
//! the process dies.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use tracing::debug;

use crate::error::Result;

/// Held exclusive lock; dropping it releases the lock.
pub struct ProcessLock {
    _guard: Flock<File>,
    path: PathBuf,
}

impl ProcessLock {
    /// Block until the lock at `path` is free, without stalling the runtime.
    pub async fn acquire(path: &Path) -> Result<Self> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::acquire_blocking(path))
            .await
            .map_err(io::Error::other)?
    }

    pub fn acquire_blocking(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        let guard = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| io::Error::from(errno))?;
        debug!("Acquired lock {}", path.display());
        Ok(Self {
            _guard: guard,
            path,
        })
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        debug!("Released lock {}", self.path.display());
    }
}
