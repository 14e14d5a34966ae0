//! Cooperative per-family locks
//!
//! Several test processes may share one physical database server. Every
//! reset/bootstrap of a backend family runs while holding an exclusive lock on
//! `<lock_dir>/schemawalk-<family>.lock`, so two processes never drop and
//! create the same schema at the same time.

use crate::database::core::BackendFamily;
use crate::error::WalkError;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Exclusive lock guard for one backend family
///
/// The lock is released when the guard is dropped, including while unwinding
/// from a failed lifecycle command.
pub struct FamilyLock {
    file: File,
    path: PathBuf,
    family: BackendFamily,
}

impl FamilyLock {
    /// Path of the lock file for a family inside `lock_dir`
    pub fn lock_path(lock_dir: &Path, family: BackendFamily) -> PathBuf {
        lock_dir.join(format!("schemawalk-{}.lock", family.name()))
    }

    /// Block until the family lock is held
    pub fn acquire(lock_dir: &Path, family: BackendFamily) -> Result<Self, WalkError> {
        let path = Self::lock_path(lock_dir, family);
        let lock_error = |cause: std::io::Error| WalkError::Lock {
            family: family.name().to_string(),
            path: path.display().to_string(),
            cause,
        };

        if !lock_dir.exists() {
            fs::create_dir_all(lock_dir).map_err(lock_error)?;
        }

        // The lock file is left in place; removing it would race with waiters
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(lock_error)?;

        debug!("waiting for {} lock at {}", family, path.display());
        file.lock_exclusive().map_err(lock_error)?;
        debug!("acquired {} lock", family);

        Ok(FamilyLock { file, path, family })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn family(&self) -> BackendFamily {
        self.family
    }
}

impl Drop for FamilyLock {
    fn drop(&mut self) {
        match FileExt::unlock(&self.file) {
            Ok(()) => debug!("released {} lock", self.family),
            // closing the file releases the lock anyway
            Err(e) => warn!("failed to unlock {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_lock_path() {
        let path = FamilyLock::lock_path(Path::new("/tmp/locks"), BackendFamily::Postgresql);
        assert_eq!(path, PathBuf::from("/tmp/locks/schemawalk-postgresql.lock"));
    }

    #[test]
    fn test_acquire_creates_lock_dir() {
        let dir = tempfile::tempdir().unwrap();
        let lock_dir = dir.path().join("nested").join("locks");
        let lock = FamilyLock::acquire(&lock_dir, BackendFamily::Sqlite).unwrap();
        assert!(lock.path().exists());
        assert_eq!(lock.family(), BackendFamily::Sqlite);
    }

    #[test]
    fn test_second_holder_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock_dir = dir.path().to_path_buf();

        let first = FamilyLock::acquire(&lock_dir, BackendFamily::Mysql).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter_dir = lock_dir.clone();
        let waiter = thread::spawn(move || {
            let _second = FamilyLock::acquire(&waiter_dir, BackendFamily::Mysql).unwrap();
            tx.send(()).unwrap();
        });

        // still blocked while the first guard is alive
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        drop(first);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn test_families_do_not_block_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let _mysql = FamilyLock::acquire(dir.path(), BackendFamily::Mysql).unwrap();
        let _pg = FamilyLock::acquire(dir.path(), BackendFamily::Postgresql).unwrap();
    }
}
