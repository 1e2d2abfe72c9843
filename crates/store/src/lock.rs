//! Sidecar-file lock with staleness reclaim.
//!
//! Cross-process mutual exclusion via exclusive creation of a
//! `<file>.lock` sidecar carrying the owner pid. A lock whose file is
//! older than `stale_seconds` is assumed to belong to a crashed
//! process and is forcibly reclaimed. This is deliberately file-based:
//! an in-process mutex would not protect against a second process
//! writing the same document.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// Tunables for lock acquisition.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Give up acquiring after this long.
    pub timeout: Duration,
    /// Sleep between acquisition attempts.
    pub poll_interval: Duration,
    /// A lock file older than this is reclaimed regardless of holder.
    pub stale_seconds: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            stale_seconds: Duration::from_secs(300),
        }
    }
}

/// Lock acquisition failures.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another holder kept the lock for the whole timeout window.
    #[error("timed out waiting for lock {path}")]
    Timeout { path: PathBuf },

    /// Filesystem failure while creating or probing the lock file.
    #[error("lock I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An acquired lock. Releasing deletes the sidecar file; dropping
/// without an explicit release still removes it best-effort.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    released: bool,
}

impl FileLock {
    /// Acquire the lock at `path`, polling until `timeout`.
    ///
    /// Stale lock files are deleted and the acquisition retried
    /// immediately; a live holder is waited out on the poll interval.
    pub async fn acquire(path: &Path, config: &LockConfig) -> Result<Self, LockError> {
        let deadline = Instant::now() + config.timeout;

        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
            {
                Ok(mut file) => {
                    // Owner pid, for post-mortem inspection of stuck locks.
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(Self {
                        path: path.to_path_buf(),
                        released: false,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(path, config.stale_seconds) {
                        tracing::warn!(path = %path.display(), "Reclaiming stale lock file");
                        match std::fs::remove_file(path) {
                            Ok(()) => continue,
                            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                            Err(source) => {
                                return Err(LockError::Io {
                                    path: path.to_path_buf(),
                                    source,
                                })
                            }
                        }
                    }
                    if Instant::now() >= deadline {
                        return Err(LockError::Timeout {
                            path: path.to_path_buf(),
                        });
                    }
                    tokio::time::sleep(config.poll_interval).await;
                }
                Err(source) => {
                    return Err(LockError::Io {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            }
        }
    }

    /// Release the lock by deleting the sidecar file.
    pub fn release(mut self) {
        self.released = true;
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove lock file");
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// A lock file whose mtime is at least `stale_seconds` old belongs to
/// a holder assumed crashed.
fn is_stale(path: &Path, stale_seconds: Duration) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    let Ok(modified) = metadata.modified() else {
        return false;
    };
    match SystemTime::now().duration_since(modified) {
        Ok(age) => age >= stale_seconds,
        Err(_) => false,
    }
}
