//! Directory-scoped mutual exclusion for push runs.
//!
//! The lock is a JSON marker file created with `O_EXCL` semantics so there
//! is no read-then-write race. The marker records the owning pid and the
//! acquisition time. If the marker exists but the recorded process can no
//! longer be signalled, the marker is stale and is reclaimed. Acquisition
//! polls on a fixed interval up to the caller's timeout.

use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

/// Name of the marker file inside the sync directory.
pub const LOCK_FILE_NAME: &str = "lock.json";

/// Default time to wait for a held lock before giving up.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Fixed interval between acquisition attempts.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Owner identity persisted in the marker file.
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    created_at: DateTime<Utc>,
}

/// A held lock. Released explicitly via [`PushLock::release`] or
/// best-effort on drop, so every exit path of the holder unlocks.
#[derive(Debug)]
pub struct PushLock {
    path: PathBuf,
    released: bool,
}

/// Acquire the lock in `lock_dir`, blocking up to `timeout`.
///
/// # Errors
///
/// Returns `LockTimeout` if another live process holds the lock for the
/// whole window, or `Io` on filesystem failures.
pub fn acquire(lock_dir: &Path, timeout: Duration) -> Result<PushLock> {
    fs::create_dir_all(lock_dir)?;
    let lock_path = lock_dir.join(LOCK_FILE_NAME);
    let deadline = Instant::now() + timeout;

    loop {
        if try_acquire(&lock_path)? {
            debug!(path = %lock_path.display(), "lock acquired");
            return Ok(PushLock {
                path: lock_path,
                released: false,
            });
        }

        if Instant::now() >= deadline {
            return Err(SyncError::LockTimeout {
                dir: lock_dir.to_path_buf(),
                timeout,
            });
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

/// One acquisition attempt. Returns false when a live process holds the
/// lock.
fn try_acquire(lock_path: &Path) -> Result<bool> {
    match fs::read(lock_path) {
        Ok(data) => {
            // Marker exists: stale if the owner is gone or unreadable.
            match serde_json::from_slice::<LockInfo>(&data) {
                Ok(info) if process_alive(info.pid) => return Ok(false),
                Ok(info) => {
                    debug!(pid = info.pid, "removing stale lock from dead process");
                    let _ = fs::remove_file(lock_path);
                }
                Err(_) => {
                    debug!("removing corrupt lock file");
                    let _ = fs::remove_file(lock_path);
                }
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let info = LockInfo {
        pid: std::process::id(),
        created_at: Utc::now(),
    };
    let data = serde_json::to_vec(&info)?;

    // create_new fails with AlreadyExists if another process won the race.
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)
    {
        Ok(mut file) => {
            if let Err(e) = file.write_all(&data) {
                let _ = fs::remove_file(lock_path);
                return Err(e.into());
            }
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

impl PushLock {
    /// Release the lock.
    ///
    /// The marker is deleted only after re-reading it and confirming the
    /// recorded owner is still this process; this defends against deleting
    /// a lock re-acquired by someone else after a stale-lock recovery
    /// raced with us. Releasing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the marker exists but cannot be read or removed.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<LockInfo>(&data) {
            Ok(info) if info.pid != std::process::id() => {
                // Not our lock anymore.
                Ok(())
            }
            // Ours, or corrupt enough that removing is the safe repair.
            _ => {
                fs::remove_file(&self.path)?;
                Ok(())
            }
        }
    }
}

impl Drop for PushLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

/// Probe whether `pid` can still be signalled.
#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // Signal 0 checks existence without delivering anything. EPERM still
    // means the process exists.
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    // No cheap liveness probe; treat the holder as alive and let the
    // timeout decide.
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let mut lock = acquire(dir.path(), DEFAULT_TIMEOUT).unwrap();
        assert!(dir.path().join(LOCK_FILE_NAME).exists());
        lock.release().unwrap();
        assert!(!dir.path().join(LOCK_FILE_NAME).exists());
    }

    #[test]
    fn test_double_release_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut lock = acquire(dir.path(), DEFAULT_TIMEOUT).unwrap();
        lock.release().unwrap();
        lock.release().unwrap();
    }

    #[test]
    fn test_second_acquire_times_out_while_held() {
        let dir = TempDir::new().unwrap();
        let _lock = acquire(dir.path(), DEFAULT_TIMEOUT).unwrap();
        let err = acquire(dir.path(), Duration::from_millis(250)).unwrap_err();
        assert!(matches!(err, SyncError::LockTimeout { .. }));
    }

    #[test]
    fn test_acquire_after_release() {
        let dir = TempDir::new().unwrap();
        let mut first = acquire(dir.path(), DEFAULT_TIMEOUT).unwrap();
        first.release().unwrap();
        let _second = acquire(dir.path(), Duration::from_millis(250)).unwrap();
    }

    #[test]
    fn test_stale_lock_from_dead_process_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        // Pid 0 / absurd pids cannot be signalled by us.
        let stale = LockInfo {
            pid: u32::MAX - 1,
            created_at: Utc::now(),
        };
        fs::write(
            dir.path().join(LOCK_FILE_NAME),
            serde_json::to_vec(&stale).unwrap(),
        )
        .unwrap();
        let _lock = acquire(dir.path(), Duration::from_millis(500)).unwrap();
    }

    #[test]
    fn test_corrupt_lock_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(LOCK_FILE_NAME), b"not json").unwrap();
        let _lock = acquire(dir.path(), Duration::from_millis(500)).unwrap();
    }

    #[test]
    fn test_release_leaves_foreign_lock_alone() {
        let dir = TempDir::new().unwrap();
        let mut lock = acquire(dir.path(), DEFAULT_TIMEOUT).unwrap();
        // Simulate another process having replaced the marker.
        let foreign = LockInfo {
            pid: std::process::id() + 1,
            created_at: Utc::now(),
        };
        fs::write(
            dir.path().join(LOCK_FILE_NAME),
            serde_json::to_vec(&foreign).unwrap(),
        )
        .unwrap();
        lock.release().unwrap();
        assert!(dir.path().join(LOCK_FILE_NAME).exists());
    }

    #[test]
    fn test_drop_releases() {
        let dir = TempDir::new().unwrap();
        {
            let _lock = acquire(dir.path(), DEFAULT_TIMEOUT).unwrap();
        }
        assert!(!dir.path().join(LOCK_FILE_NAME).exists());
    }
}
