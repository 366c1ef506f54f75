use crate::CacheError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Exclusive advisory lock on the cache index lock file.
///
/// The lock file is separate from the index document so a crash while the
/// lock is held never leaves a half-written index behind. Released on drop.
pub struct IndexLock {
    lock_file: File,
}

impl IndexLock {
    /// Block until the exclusive lock is held.
    pub fn acquire(lock_path: &Path) -> Result<Self, CacheError> {
        let file = open_lock_file(lock_path)?;
        file.lock_exclusive()
            .map_err(|e| CacheError::LockFailed(format!("{}: {e}", lock_path.display())))?;
        Ok(Self { lock_file: file })
    }

    /// Take the lock only if nobody else holds it.
    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, CacheError> {
        let file = open_lock_file(lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { lock_file: file })),
            Err(_) => Ok(None),
        }
    }
}

fn open_lock_file(lock_path: &Path) -> Result<File, CacheError> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?)
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}
