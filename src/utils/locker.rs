//! File-based locking to prevent concurrent runs against one backup root
//!
//! The cascade is not atomic, so two overlapping invocations can corrupt a
//! bucket. The lock fails the second invocation fast instead.

use anyhow::{Context, Result};
use fd_lock::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::fs::{File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Lock guard for a backup root; held for the duration of one run.
pub struct RotationLock {
    // Lock and guard live in one box so they drop together.
    _lock: Box<(RwLock<File>, Option<fd_lock::RwLockWriteGuard<'static, File>>)>,
    lock_path: PathBuf,
}

impl RotationLock {
    /// Acquire an exclusive lock for a backup root.
    /// Returns an error if a run against the same root is already active.
    pub fn acquire(root: &Path) -> Result<Self> {
        let lock_path = Self::lock_path(root);

        debug!("Attempting to acquire lock: {:?}", lock_path);

        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create lock directory")?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .context(format!("Failed to open lock file: {:?}", lock_path))?;

        let mut boxed_lock = Box::new((RwLock::new(file), None));

        // SAFETY: the guard references the RwLock stored in the same Box.
        // The Box does not move after creation and the tuple drop order
        // releases the guard before the RwLock.
        let lock_ptr = &mut boxed_lock.0 as *mut RwLock<File>;
        let guard = unsafe { (*lock_ptr).try_write() }.context(format!(
            "Backup root {:?} is already being rotated (lock held)",
            root
        ))?;
        let static_guard: fd_lock::RwLockWriteGuard<'static, File> =
            unsafe { std::mem::transmute(guard) };
        boxed_lock.1 = Some(static_guard);

        info!("Acquired rotation lock for {:?}", root);

        Ok(Self {
            _lock: boxed_lock,
            lock_path,
        })
    }

    fn lock_path(root: &Path) -> PathBuf {
        let mut hasher = DefaultHasher::new();
        root.hash(&mut hasher);

        #[cfg(unix)]
        let base = Path::new("/tmp");

        #[cfg(windows)]
        let base = std::env::temp_dir();

        base.join(format!("rsync-rotator-{:016x}.lock", hasher.finish()))
    }

    #[allow(dead_code)]
    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for RotationLock {
    fn drop(&mut self) {
        debug!("Released rotation lock: {:?}", self.lock_path);

        // Best effort; a stale file does not block the next acquire.
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            debug!("Failed to remove lock file: {}", e);
        }
    }
}
