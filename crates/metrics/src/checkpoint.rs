//! Crash-recovery checkpoint files.
//!
//! Checkpoints capture minimal bookkeeping on a dual-threshold cadence
//! (every N outcomes or T elapsed, whichever first). They are
//! informational: resumption correctness comes from result-store
//! dedup, never from replaying a checkpoint.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire format of `checkpoint-<timestamp>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    #[serde(rename = "last_job_id")]
    pub last_identifier: Option<String>,
    pub total_completed: u64,
    pub total_failed: u64,
    pub pending: u64,
    pub timestamp: DateTime<Utc>,
}

/// Dual-threshold checkpoint writer.
pub struct CheckpointWriter {
    dir: PathBuf,
    every_outcomes: usize,
    every: Duration,
    outcomes_since_write: usize,
    last_write: Instant,
}

impl CheckpointWriter {
    /// `every_outcomes` of zero disables the count threshold; `every`
    /// of zero disables the time threshold.
    pub fn new(dir: impl Into<PathBuf>, every_outcomes: usize, every: Duration) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            every_outcomes,
            every,
            outcomes_since_write: 0,
            last_write: Instant::now(),
        })
    }

    /// Count one outcome and write a checkpoint if either threshold
    /// has been crossed.
    pub fn maybe_write(&mut self, state: &CheckpointState) {
        self.outcomes_since_write += 1;
        let count_due = self.every_outcomes > 0 && self.outcomes_since_write >= self.every_outcomes;
        let time_due = !self.every.is_zero() && self.last_write.elapsed() >= self.every;
        if count_due || time_due {
            self.write(state);
        }
    }

    /// Write unconditionally (shutdown path).
    pub fn force_write(&mut self, state: &CheckpointState) {
        self.write(state);
    }

    fn write(&mut self, state: &CheckpointState) {
        self.outcomes_since_write = 0;
        self.last_write = Instant::now();

        // Millisecond component so bursts within one second do not
        // overwrite each other.
        let stamp = state.timestamp.format("%Y%m%dT%H%M%S%.3fZ");
        let path = self.dir.join(format!("checkpoint-{stamp}.json"));
        let payload = match serde_json::to_string_pretty(state) {
            Ok(mut s) => {
                s.push('\n');
                s
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode checkpoint");
                return;
            }
        };
        if let Err(e) = std::fs::write(&path, payload) {
            tracing::error!(path = %path.display(), error = %e, "Failed to write checkpoint");
        } else {
            tracing::debug!(path = %path.display(), "Checkpoint written");
        }
    }
}

/// Read the newest checkpoint in `dir`, if any. Used once at startup
/// for a recovery log line.
pub fn latest_checkpoint(dir: &Path) -> Option<CheckpointState> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut newest: Option<(String, PathBuf)> = None;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("checkpoint-") && name.ends_with(".json") {
            // Timestamped names sort lexicographically by recency.
            if newest.as_ref().map_or(true, |(n, _)| name > *n) {
                newest = Some((name, entry.path()));
            }
        }
    }
    let (_, path) = newest?;
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(completed: u64) -> CheckpointState {
        CheckpointState {
            last_identifier: Some(format!("id-{completed}")),
            total_completed: completed,
            total_failed: 0,
            pending: 10 - completed,
            timestamp: Utc::now(),
        }
    }

    fn checkpoint_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("checkpoint-"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn count_threshold_triggers_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = CheckpointWriter::new(dir.path(), 3, Duration::ZERO).unwrap();

        writer.maybe_write(&state(1));
        writer.maybe_write(&state(2));
        assert!(checkpoint_files(dir.path()).is_empty());

        writer.maybe_write(&state(3));
        assert_eq!(checkpoint_files(dir.path()).len(), 1);
    }

    #[test]
    fn force_write_ignores_thresholds() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = CheckpointWriter::new(dir.path(), 1000, Duration::ZERO).unwrap();
        writer.force_write(&state(5));
        assert_eq!(checkpoint_files(dir.path()).len(), 1);
    }

    #[test]
    fn wire_format_uses_last_job_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = CheckpointWriter::new(dir.path(), 0, Duration::ZERO).unwrap();
        writer.force_write(&state(7));

        let name = &checkpoint_files(dir.path())[0];
        let contents = std::fs::read_to_string(dir.path().join(name)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["last_job_id"], "id-7");
        assert_eq!(value["total_completed"], 7);
        assert_eq!(value["pending"], 3);
    }

    #[test]
    fn writes_within_one_second_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let base = Utc::now();
        let first = CheckpointState {
            timestamp: base,
            ..state(1)
        };
        let second = CheckpointState {
            timestamp: base + chrono::Duration::milliseconds(5),
            ..state(2)
        };

        let mut writer = CheckpointWriter::new(dir.path(), 0, Duration::ZERO).unwrap();
        writer.force_write(&first);
        writer.force_write(&second);

        assert_eq!(checkpoint_files(dir.path()).len(), 2);
        let read = latest_checkpoint(dir.path()).unwrap();
        assert_eq!(read.total_completed, 2);
    }

    #[test]
    fn latest_checkpoint_returns_newest() {
        let dir = tempfile::tempdir().unwrap();
        let old = CheckpointState {
            timestamp: Utc::now() - chrono::Duration::seconds(90),
            ..state(1)
        };
        let new = state(9);

        let mut writer = CheckpointWriter::new(dir.path(), 0, Duration::ZERO).unwrap();
        writer.force_write(&old);
        writer.force_write(&new);

        let read = latest_checkpoint(dir.path()).unwrap();
        assert_eq!(read.total_completed, 9);
    }
}
