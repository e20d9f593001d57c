use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::StoreError;

/// Exclusive advisory lock via `create_new` on a sibling `.lock` file.
/// Released on drop.
pub struct LockFile {
    path: PathBuf,
    _handle: std::fs::File,
}

impl LockFile {
    pub fn acquire(target: &Path) -> Result<Self, StoreError> {
        let lock_path = target.with_extension("lock");
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(handle) => Ok(Self {
                path: lock_path,
                _handle: handle,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StoreError::LockContention(target.to_path_buf()))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Like `acquire`, but waits out a concurrent holder. Ref locks are held
    /// only for a verify-and-write window, so contention clears quickly.
    pub fn acquire_blocking(target: &Path, timeout: Duration) -> Result<Self, StoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            match Self::acquire(target) {
                Ok(lock) => return Ok(lock),
                Err(StoreError::LockContention(p)) => {
                    if Instant::now() >= deadline {
                        return Err(StoreError::LockContention(p));
                    }
                    std::thread::sleep(Duration::from_millis(2));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_released() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("some-ref");

        let lock = LockFile::acquire(&target).unwrap();
        assert!(matches!(
            LockFile::acquire(&target),
            Err(StoreError::LockContention(_))
        ));
        drop(lock);
        LockFile::acquire(&target).unwrap();
    }

    #[test]
    fn blocking_acquire_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("held-ref");

        let _lock = LockFile::acquire(&target).unwrap();
        let res = LockFile::acquire_blocking(&target, Duration::from_millis(20));
        assert!(matches!(res, Err(StoreError::LockContention(_))));
    }
}
