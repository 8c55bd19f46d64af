//! Cross-process mutual exclusion for the daemon.
//!
//! One daemon per workspace: an advisory exclusive lock on
//! `.runforge/queue/daemon.lock`, acquired non-blocking so a second daemon
//! fails fast instead of waiting.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    /// Another live daemon holds the lock.
    #[error("another daemon already holds the workspace lock")]
    Contended,
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

pub struct WorkspaceLock {
    path: PathBuf,
    file: Option<File>,
}

impl WorkspaceLock {
    pub fn new(path: PathBuf) -> Self {
        Self { path, file: None }
    }

    /// Try to acquire the lock. On success the current PID is written to the
    /// lock file.
    ///
    /// The file is opened without truncation: wiping it before the lock is
    /// held would destroy the running daemon's recorded PID.
    pub fn acquire(&mut self) -> Result<(), LockError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))
                .map_err(LockError::Io)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))
            .map_err(LockError::Io)?;

        if file.try_lock_exclusive().is_err() {
            return Err(LockError::Contended);
        }

        file.set_len(0)
            .and_then(|_| write!(file, "{}", std::process::id()))
            .with_context(|| format!("failed to write pid to {}", self.path.display()))
            .map_err(LockError::Io)?;

        self.file = Some(file);
        Ok(())
    }

    /// Unlock and remove the lock file. Safe to call after a failed acquire.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = fs2::FileExt::unlock(&file);
            drop(file);
            let _ = fs::remove_file(&self.path);
        }
    }

    /// PID recorded in the lock file, if any. Diagnostics only: the value can
    /// be stale after a crash and is never used for correctness.
    pub fn owner_pid(&self) -> Option<u32> {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        self.release();
    }
}
