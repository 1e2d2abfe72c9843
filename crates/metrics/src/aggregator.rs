//! The single-owner metrics aggregator task.
//!
//! Workers hold a cheap [`MetricsHandle`] and fire events at it; the
//! spawned task owns every piece of mutable metrics and checkpoint
//! state. When the last handle is dropped the channel closes, the task
//! emits the final snapshot plus a forced checkpoint, and resolves its
//! join handle with the run summary.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::aggregate::{build_snapshot, Snapshot};
use crate::checkpoint::{CheckpointState, CheckpointWriter};
use crate::event::{MetricsEvent, TaskOutcome};

/// Cadence tunables for snapshots and checkpoints. A zero count
/// disables that count threshold; a zero duration disables that time
/// threshold.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub snapshot_every_outcomes: usize,
    pub snapshot_every: Duration,
    pub checkpoint_every_outcomes: usize,
    pub checkpoint_every: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            snapshot_every_outcomes: 50,
            snapshot_every: Duration::from_secs(60),
            checkpoint_every_outcomes: 25,
            checkpoint_every: Duration::from_secs(30),
        }
    }
}

/// Sender side of the aggregator channel. Clone freely; sends never
/// block and are silently dropped if the aggregator is already gone.
#[derive(Clone)]
pub struct MetricsHandle {
    tx: mpsc::UnboundedSender<MetricsEvent>,
}

impl MetricsHandle {
    pub fn outcome(&self, outcome: TaskOutcome) {
        let _ = self.tx.send(MetricsEvent::Outcome(outcome));
    }

    pub fn reminder_issued(&self, target: &str) {
        let _ = self.tx.send(MetricsEvent::ReminderIssued {
            target: target.to_string(),
        });
    }
}

/// Spawn the aggregator task.
///
/// `planned_total` is the number of tasks the planner produced; the
/// checkpoint `pending` counter is derived from it. The join handle
/// resolves to the final snapshot once every [`MetricsHandle`] clone
/// has been dropped.
pub fn spawn_aggregator(
    out_dir: impl Into<PathBuf>,
    config: MetricsConfig,
    planned_total: u64,
) -> (MetricsHandle, JoinHandle<Snapshot>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let out_dir = out_dir.into();
    let handle = tokio::spawn(run(out_dir, config, planned_total, rx));
    (MetricsHandle { tx }, handle)
}

async fn run(
    out_dir: PathBuf,
    config: MetricsConfig,
    planned_total: u64,
    mut rx: mpsc::UnboundedReceiver<MetricsEvent>,
) -> Snapshot {
    let session_start = Utc::now();
    let metrics_dir = out_dir.join("metrics");
    if let Err(e) = std::fs::create_dir_all(&metrics_dir) {
        tracing::error!(path = %metrics_dir.display(), error = %e, "Failed to create metrics dir");
    }

    let mut checkpoints = CheckpointWriter::new(
        &out_dir,
        config.checkpoint_every_outcomes,
        config.checkpoint_every,
    )
    .ok();
    if checkpoints.is_none() {
        tracing::error!(path = %out_dir.display(), "Checkpointing disabled: directory unavailable");
    }

    let mut outcomes: Vec<TaskOutcome> = Vec::new();
    let mut reminders: BTreeMap<String, u64> = BTreeMap::new();
    let mut last_identifier: Option<String> = None;
    let mut completed = 0u64;
    let mut failed = 0u64;
    let mut outcomes_since_snapshot = 0usize;

    let snapshot_period = if config.snapshot_every.is_zero() {
        // Effectively disabled; the count threshold still applies.
        Duration::from_secs(3600)
    } else {
        config.snapshot_every
    };
    let mut ticker = tokio::time::interval(snapshot_period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // first tick fires immediately; discard it

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(MetricsEvent::Outcome(outcome)) => {
                        if outcome.success {
                            completed += 1;
                        } else {
                            failed += 1;
                        }
                        last_identifier = Some(outcome.task_id.clone());
                        outcomes.push(outcome);
                        outcomes_since_snapshot += 1;

                        if let Some(cp) = checkpoints.as_mut() {
                            cp.maybe_write(&CheckpointState {
                                last_identifier: last_identifier.clone(),
                                total_completed: completed,
                                total_failed: failed,
                                pending: planned_total.saturating_sub(completed + failed),
                                timestamp: Utc::now(),
                            });
                        }

                        if config.snapshot_every_outcomes > 0
                            && outcomes_since_snapshot >= config.snapshot_every_outcomes
                        {
                            emit_snapshot("outcome_count", &metrics_dir, &outcomes, &reminders, session_start);
                            outcomes_since_snapshot = 0;
                        }
                    }
                    Some(MetricsEvent::ReminderIssued { target }) => {
                        *reminders.entry(target).or_insert(0) += 1;
                    }
                    // Channel closed: every worker is done. Fall
                    // through to the final summary.
                    None => break,
                }
            }
            _ = ticker.tick() => {
                emit_snapshot("interval", &metrics_dir, &outcomes, &reminders, session_start);
                outcomes_since_snapshot = 0;
            }
        }
    }

    if let Some(cp) = checkpoints.as_mut() {
        cp.force_write(&CheckpointState {
            last_identifier: last_identifier.clone(),
            total_completed: completed,
            total_failed: failed,
            pending: planned_total.saturating_sub(completed + failed),
            timestamp: Utc::now(),
        });
    }

    let summary = emit_snapshot("final", &metrics_dir, &outcomes, &reminders, session_start);
    tracing::info!(
        processed = summary.total_processed,
        success = summary.success,
        failed = summary.failed,
        failure_rate = format!("{:.2}%", summary.failure_rate),
        avg_latency_ms = format!("{:.0}", summary.average_latency_ms),
        throughput_per_minute = format!("{:.2}", summary.throughput_per_minute),
        reminders = summary.total_reminders,
        "Run summary"
    );
    summary
}

/// Build a snapshot, append it to the dated JSONL file, and log it.
fn emit_snapshot(
    trigger: &str,
    metrics_dir: &std::path::Path,
    outcomes: &[TaskOutcome],
    reminders: &BTreeMap<String, u64>,
    session_start: chrono::DateTime<Utc>,
) -> Snapshot {
    let snapshot = build_snapshot(trigger, outcomes, reminders, session_start, Utc::now());

    let path = metrics_dir.join(format!(
        "summary-{}.jsonl",
        snapshot.generated_at.format("%Y%m%d")
    ));
    match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
        Ok(mut file) => {
            if let Ok(line) = serde_json::to_string(&snapshot) {
                if let Err(e) = writeln!(file, "{line}") {
                    tracing::error!(path = %path.display(), error = %e, "Failed to append snapshot");
                }
            }
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to open snapshot file");
        }
    }

    tracing::debug!(
        trigger,
        processed = snapshot.total_processed,
        failed = snapshot.failed,
        "Metrics snapshot"
    );
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn outcome(id: &str, target: &str, success: bool, attempts: u32) -> TaskOutcome {
        TaskOutcome {
            task_id: id.to_string(),
            target: target.to_string(),
            latency: StdDuration::from_millis(120),
            success,
            attempts,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn final_summary_emitted_when_handles_drop() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_aggregator(
            dir.path(),
            MetricsConfig {
                snapshot_every_outcomes: 0,
                snapshot_every: Duration::ZERO,
                checkpoint_every_outcomes: 0,
                checkpoint_every: Duration::ZERO,
            },
            3,
        );

        handle.outcome(outcome("a", "m1", true, 1));
        handle.outcome(outcome("b", "m1", false, 2));
        handle.reminder_issued("m1");
        drop(handle);

        let summary = join.await.unwrap();
        assert_eq!(summary.trigger, "final");
        assert_eq!(summary.total_processed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total_reminders, 1);

        // Final checkpoint was forced on shutdown.
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.starts_with("checkpoint-")));

        // Exactly one snapshot line (the final one) in the dated file.
        let metrics_dir = dir.path().join("metrics");
        let snapshot_file = std::fs::read_dir(&metrics_dir)
            .unwrap()
            .flatten()
            .next()
            .unwrap()
            .path();
        let contents = std::fs::read_to_string(snapshot_file).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn count_threshold_emits_interim_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_aggregator(
            dir.path(),
            MetricsConfig {
                snapshot_every_outcomes: 2,
                snapshot_every: Duration::ZERO,
                checkpoint_every_outcomes: 0,
                checkpoint_every: Duration::ZERO,
            },
            4,
        );

        for i in 0..4 {
            handle.outcome(outcome(&format!("t{i}"), "m1", true, 1));
        }
        drop(handle);
        let summary = join.await.unwrap();
        assert_eq!(summary.total_processed, 4);

        let metrics_dir = dir.path().join("metrics");
        let snapshot_file = std::fs::read_dir(&metrics_dir)
            .unwrap()
            .flatten()
            .next()
            .unwrap()
            .path();
        let contents = std::fs::read_to_string(snapshot_file).unwrap();
        // Two count-triggered snapshots plus the final one.
        assert_eq!(contents.lines().count(), 3);
    }
}
