//! Lock-protected read-merge-write result store.
//!
//! [`ResultStore`] routes each record into its identifier's document
//! under the sidecar lock, writing atomically via a temp file and
//! rename. Two flush strategies: `Immediate` (write-through per
//! record) and `Batched` (buffer until a size or age threshold, then
//! flush grouped by identifier so each document pays one
//! lock/read/merge/write cycle per flush).
//!
//! Lock timeouts never escape to the caller: the affected writes are
//! deferred and retried on later flushes, up to a bounded retry count,
//! then logged and dropped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::document::{Record, ResultDocument};
use crate::lock::{FileLock, LockConfig, LockError};

/// When buffered writes are pushed to disk.
#[derive(Debug, Clone)]
pub enum FlushStrategy {
    /// Write-through: every record lands on disk immediately.
    Immediate,
    /// Buffer until `max_entries` records or `max_age` since the last
    /// flush, whichever comes first.
    Batched { max_entries: usize, max_age: Duration },
}

/// Store tunables.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub lock: LockConfig,
    pub strategy: FlushStrategy,
    /// How many flush cycles a lock-deferred write survives before it
    /// is dropped with an error log.
    pub defer_retry_limit: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock: LockConfig::default(),
            strategy: FlushStrategy::Immediate,
            defer_retry_limit: 3,
        }
    }
}

/// Hard failures a worker should treat as internal errors. Lock
/// timeouts are not among them; those defer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode result document: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One buffered write.
#[derive(Debug)]
struct PendingWrite {
    identifier: String,
    target: String,
    dedup_key: String,
    record: Record,
    defer_attempts: u32,
}

#[derive(Debug)]
struct BufferState {
    pending: Vec<PendingWrite>,
    last_flush: Instant,
}

/// Atomic, lock-protected, multi-writer result persistence.
pub struct ResultStore {
    dir: PathBuf,
    config: StoreConfig,
    state: Mutex<BufferState>,
}

impl ResultStore {
    /// Create the store, ensuring the output directory exists.
    pub fn new(dir: impl Into<PathBuf>, config: StoreConfig) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            config,
            state: Mutex::new(BufferState {
                pending: Vec::new(),
                last_flush: Instant::now(),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Route one record toward its identifier's document.
    ///
    /// Under `Immediate` this performs the locked merge right away;
    /// under `Batched` it buffers and flushes when a threshold is met.
    pub async fn write(
        &self,
        identifier: &str,
        target: &str,
        dedup_key: &str,
        record: Record,
    ) -> Result<(), StoreError> {
        let entry = PendingWrite {
            identifier: identifier.to_string(),
            target: target.to_string(),
            dedup_key: dedup_key.to_string(),
            record,
            defer_attempts: 0,
        };

        let mut state = self.state.lock().await;
        state.pending.push(entry);

        let should_flush = match &self.config.strategy {
            FlushStrategy::Immediate => true,
            FlushStrategy::Batched { max_entries, max_age } => {
                state.pending.len() >= *max_entries || state.last_flush.elapsed() >= *max_age
            }
        };

        if should_flush {
            self.flush_locked(&mut state).await?;
        }
        Ok(())
    }

    /// Flush everything buffered, including deferred writes. Called on
    /// every shutdown path.
    pub async fn flush_all(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await
    }

    /// Whether a record already exists for the triple. Used by the
    /// planner to skip recomputation.
    pub fn has_entry(&self, identifier: &str, target: &str, dedup_key: &str) -> bool {
        let path = self.document_path(identifier);
        if !path.exists() {
            return false;
        }
        ResultDocument::load_or_empty(&path).has_entry(target, dedup_key)
    }

    fn document_path(&self, identifier: &str) -> PathBuf {
        self.dir.join(format!("{identifier}.json"))
    }

    /// Flush the buffer grouped by identifier. Lock-timed-out groups
    /// are re-buffered with their defer count bumped; entries past the
    /// retry limit are dropped loudly.
    async fn flush_locked(&self, state: &mut BufferState) -> Result<(), StoreError> {
        if state.pending.is_empty() {
            state.last_flush = Instant::now();
            return Ok(());
        }

        let mut by_identifier: BTreeMap<String, Vec<PendingWrite>> = BTreeMap::new();
        for entry in state.pending.drain(..) {
            by_identifier.entry(entry.identifier.clone()).or_default().push(entry);
        }

        let mut groups = by_identifier.into_iter();
        while let Some((identifier, entries)) = groups.next() {
            match self.write_document(&identifier, &entries).await {
                Ok(()) => {}
                Err(WriteOutcome::LockTimeout) => {
                    for mut entry in entries {
                        entry.defer_attempts += 1;
                        if entry.defer_attempts > self.config.defer_retry_limit {
                            tracing::error!(
                                identifier = %entry.identifier,
                                target = %entry.target,
                                attempts = entry.defer_attempts,
                                "Dropping result write after repeated lock timeouts"
                            );
                        } else {
                            tracing::warn!(
                                identifier = %entry.identifier,
                                target = %entry.target,
                                attempt = entry.defer_attempts,
                                "Lock busy; deferring result write"
                            );
                            state.pending.push(entry);
                        }
                    }
                }
                Err(WriteOutcome::Fatal(e)) => {
                    // Re-buffer this group and every group not yet
                    // attempted; a later flush retries them once the
                    // underlying I/O problem clears.
                    state.pending.extend(entries);
                    for (_, rest) in groups {
                        state.pending.extend(rest);
                    }
                    tracing::error!(
                        identifier = %identifier,
                        rebuffered = state.pending.len(),
                        error = %e,
                        "Fatal write error; re-buffering unflushed entries"
                    );
                    state.last_flush = Instant::now();
                    return Err(e);
                }
            }
        }

        state.last_flush = Instant::now();
        Ok(())
    }

    /// One lock/read/merge/write cycle for a single identifier.
    async fn write_document(
        &self,
        identifier: &str,
        entries: &[PendingWrite],
    ) -> Result<(), WriteOutcome> {
        let path = self.document_path(identifier);
        let lock_path = self.dir.join(format!("{identifier}.json.lock"));

        let lock = match FileLock::acquire(&lock_path, &self.config.lock).await {
            Ok(lock) => lock,
            Err(LockError::Timeout { .. }) => return Err(WriteOutcome::LockTimeout),
            Err(LockError::Io { path, source }) => {
                return Err(WriteOutcome::Fatal(StoreError::Io { path, source }))
            }
        };

        let result = self.merge_and_replace(&path, entries);
        lock.release();
        result.map_err(WriteOutcome::Fatal)
    }

    fn merge_and_replace(&self, path: &Path, entries: &[PendingWrite]) -> Result<(), StoreError> {
        let mut doc = ResultDocument::load_or_empty(path);
        for entry in entries {
            doc.merge(&entry.target, &entry.dedup_key, entry.record.clone());
        }

        let mut payload = serde_json::to_string_pretty(&doc)?;
        payload.push('\n');

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, payload).map_err(|source| StoreError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::debug!(path = %path.display(), merged = entries.len(), "Result document written");
        Ok(())
    }
}

/// Internal outcome separating deferrable lock timeouts from fatal
/// errors.
enum WriteOutcome {
    LockTimeout,
    Fatal(StoreError),
}
