//! Single-host guard
//!
//! The core assumes one active caller. A host takes an [`InstanceLock`] on
//! the database before opening it so a second host process fails fast
//! instead of interleaving with the first.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{OrgError, Result};

/// How long [`InstanceLock::acquire`] waits for another holder
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Exclusive advisory lock on `<db>.lock`, released on drop
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    file: File,
}

impl InstanceLock {
    pub fn acquire<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::acquire_with_timeout(db_path, DEFAULT_LOCK_TIMEOUT)
    }

    pub fn acquire_with_timeout<P: AsRef<Path>>(db_path: P, timeout: Duration) -> Result<Self> {
        let mut name = db_path.as_ref().as_os_str().to_owned();
        name.push(".lock");
        let path = PathBuf::from(name);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| OrgError::io(parent, e))?;
            }
        }

        // Not truncated here: the holder's PID must survive a failed attempt
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| OrgError::io(&path, e))?;

        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() > timeout {
                        return Err(OrgError::Locked(db_path.as_ref().to_path_buf()));
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => return Err(OrgError::io(&path, e)),
            }
        }

        file.set_len(0).map_err(|e| OrgError::io(&path, e))?;
        writeln!(file, "{}", std::process::id()).map_err(|e| OrgError::io(&path, e))?;
        debug!(path = %path.display(), "instance lock acquired");

        Ok(Self { path, file })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_holder_times_out() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("orgplus.db");

        let first = InstanceLock::acquire(&db).unwrap();
        assert!(first.path().ends_with("orgplus.db.lock"));
        let pid = fs::read_to_string(first.path()).unwrap();
        assert_eq!(pid.trim(), std::process::id().to_string());

        let second = InstanceLock::acquire_with_timeout(&db, Duration::from_millis(200));
        assert!(matches!(second, Err(OrgError::Locked(_))));

        drop(first);
        assert!(InstanceLock::acquire_with_timeout(&db, Duration::from_millis(200)).is_ok());
    }
}
