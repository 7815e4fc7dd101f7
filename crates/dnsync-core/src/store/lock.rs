//! Advisory lock files
//!
//! A lock on `path` is the file `path.lock`, created exclusively and
//! holding its creation time in epoch milliseconds. A lock older than
//! [`STALE_LOCK_AGE`] is considered abandoned by a crashed process and is
//! force-released by the next acquirer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::store::sibling_path;

/// Age after which a lock file is treated as abandoned
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(5 * 60);

/// A held lock file. Released on [`FileLock::release`] or drop.
#[derive(Debug)]
pub struct FileLock {
    target: PathBuf,
    lock_path: PathBuf,
    released: bool,
}

impl FileLock {
    /// Path of the lock file guarding `path`
    pub fn lock_path_for(path: &Path) -> PathBuf {
        sibling_path(path, ".lock")
    }

    /// Try once to take the lock on `path`.
    ///
    /// Fails with `Error::FileLock` if a live lock exists.
    pub async fn acquire(path: &Path) -> Result<Self> {
        let lock_path = Self::lock_path_for(path);

        // Second pass only after reclaiming a stale lock
        for _ in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(Utc::now().timestamp_millis().to_string().as_bytes())
                        .await?;
                    file.sync_all().await?;
                    debug!(path = %lock_path.display(), "Lock acquired");
                    return Ok(Self {
                        target: path.to_path_buf(),
                        lock_path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let age = lock_age(&lock_path).await;
                    match age {
                        Some(age) if age < STALE_LOCK_AGE => {
                            return Err(Error::file_lock(
                                path,
                                format!("locked by another writer {} ms ago", age.as_millis()),
                            ));
                        }
                        _ => {
                            warn!(
                                path = %lock_path.display(),
                                age_ms = age.map(|a| a.as_millis() as u64),
                                "Reclaiming stale lock"
                            );
                            match fs::remove_file(&lock_path).await {
                                Ok(()) => {}
                                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                                Err(e) => return Err(e.into()),
                            }
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::file_lock(path, "lock was re-taken while reclaiming a stale lock"))
    }

    /// Take the lock, retrying while it is held by a live writer
    pub async fn acquire_with_retry(path: &Path, attempts: usize, delay: Duration) -> Result<Self> {
        let mut last_error = None;
        for attempt in 0..attempts.max(1) {
            match Self::acquire(path).await {
                Ok(lock) => return Ok(lock),
                Err(e @ Error::FileLock { .. }) => {
                    debug!(path = %path.display(), attempt, "Lock busy, retrying");
                    last_error = Some(e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| Error::file_lock(path, "lock not acquired")))
    }

    /// File this lock protects
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Remove the lock file
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.lock_path.display(), "Lock file vanished before release");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the lock file, logging a failure instead of returning it.
    ///
    /// For callers whose protected write already completed.
    pub async fn release_logged(self) {
        let lock_path = self.lock_path.clone();
        if let Err(e) = self.release().await {
            warn!(path = %lock_path.display(), error = %e, "Failed to remove lock file");
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

/// Age of a lock file from its recorded timestamp, falling back to mtime.
///
/// `None` means the age could not be determined; such locks are reclaimed.
async fn lock_age(lock_path: &Path) -> Option<Duration> {
    let now_ms = Utc::now().timestamp_millis();

    if let Ok(content) = fs::read_to_string(lock_path).await
        && let Ok(created_ms) = content.trim().parse::<i64>()
    {
        return Some(Duration::from_millis(now_ms.saturating_sub(created_ms).max(0) as u64));
    }

    let modified = fs::metadata(lock_path).await.ok()?.modified().ok()?;
    modified.elapsed().ok()
}
