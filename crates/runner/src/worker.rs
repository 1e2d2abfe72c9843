//! The per-target worker loop.
//!
//! One worker owns one target: its queue, its connector (and therefore
//! its session), and its batch size controller. Batches run strictly
//! sequentially within a worker; concurrency comes from running one
//! worker per target.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use drover_backend::{Connector, ChatTransport, SendError};
use drover_core::schema::Schema;
use drover_core::task::Task;
use drover_metrics::{MetricsHandle, TaskOutcome};
use drover_store::{ResultStore, StoreError};

use crate::batch::{AdaptiveBatcher, BatchSignal};

/// Retry and pacing tunables, shared by every worker in a run.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum attempts per task before it fails terminally.
    pub retry_limit: u32,
    /// Upper bound for the adaptive batch size.
    pub max_batch_size: usize,
    /// Backoff before a retry batch: `min(base * attempt, max)`.
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            retry_limit: 2,
            max_batch_size: 4,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(2),
        }
    }
}

/// Failure that halts one worker. Other targets keep running.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("result store failure: {0}")]
    Store(#[from] StoreError),
}

/// Lifecycle phases, logged at debug on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Idle,
    Fetching,
    Sending,
    Routing,
    Retrying,
    Draining,
    Stopped,
}

struct Worker<'a, T: ChatTransport> {
    connector: &'a mut Connector<T>,
    schema: &'a Schema,
    store: &'a ResultStore,
    metrics: &'a MetricsHandle,
    config: &'a WorkerConfig,
    batcher: AdaptiveBatcher,
    state: WorkerState,
}

/// Drive one target's queue to completion or cancellation.
///
/// `Connector::close` runs on every exit path, including internal
/// errors.
pub async fn run_worker<T: ChatTransport>(
    connector: &mut Connector<T>,
    queue: VecDeque<Task>,
    schema: &Schema,
    store: &ResultStore,
    metrics: &MetricsHandle,
    cancel: &CancellationToken,
    config: &WorkerConfig,
) -> Result<(), WorkerError> {
    let mut worker = Worker {
        connector,
        schema,
        store,
        metrics,
        config,
        batcher: AdaptiveBatcher::new(config.max_batch_size),
        state: WorkerState::Idle,
    };
    let result = worker.drive(queue, cancel).await;
    worker.connector.close();
    result
}

impl<T: ChatTransport> Worker<'_, T> {
    fn transition(&mut self, next: WorkerState) {
        if self.state != next {
            tracing::debug!(
                target = %self.connector.target(),
                from = ?self.state,
                to = ?next,
                "Worker state"
            );
            self.state = next;
        }
    }

    async fn drive(
        &mut self,
        mut queue: VecDeque<Task>,
        cancel: &CancellationToken,
    ) -> Result<(), WorkerError> {
        while !queue.is_empty() {
            if cancel.is_cancelled() {
                self.drain(queue);
                return Ok(());
            }

            self.transition(WorkerState::Fetching);
            let take = self.batcher.size().min(queue.len());
            let batch: Vec<Task> = queue.drain(..take).collect();

            self.transition(WorkerState::Sending);
            let started = Instant::now();
            let outcome = {
                let texts: Vec<&str> = batch.iter().map(|t| t.input_text.as_str()).collect();
                self.connector.send_batch(&texts).await
            };
            let latency = started.elapsed();

            self.transition(WorkerState::Routing);
            let retries = match outcome {
                Ok(slots) => self.route_reply(batch, slots, latency).await?,
                Err(SendError::Parse) => {
                    tracing::warn!(
                        target = %self.connector.target(),
                        items = batch.len(),
                        "No records recovered; retrying whole batch"
                    );
                    self.batcher.record(BatchSignal::Retried);
                    self.fail_or_collect(batch, latency)
                }
                Err(err @ (SendError::Transport(_) | SendError::Http { .. })) => {
                    tracing::warn!(
                        target = %self.connector.target(),
                        items = batch.len(),
                        error = %err,
                        "Batch request failed; shrinking batch size"
                    );
                    self.batcher.record(BatchSignal::Overload);
                    self.fail_or_collect(batch, latency)
                }
            };

            if retries.is_empty() {
                self.transition(WorkerState::Idle);
                continue;
            }

            // A scheduled retry is the strongest drift signal, so the
            // session gets a compliance reminder before the next send.
            self.connector.note_retry();
            self.metrics.reminder_issued(self.connector.target());

            let max_attempt = retries.iter().map(|t| t.attempt_count).max().unwrap_or(1);
            for task in retries.into_iter().rev() {
                queue.push_front(task);
            }

            self.transition(WorkerState::Retrying);
            let backoff = (self.config.backoff_base * max_attempt).min(self.config.backoff_max);
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(backoff) => {}
            }
        }

        self.transition(WorkerState::Stopped);
        Ok(())
    }

    /// Route one reply's slots back to their tasks. Returns the tasks
    /// to retry, in their original batch order.
    async fn route_reply(
        &mut self,
        batch: Vec<Task>,
        slots: Vec<Option<drover_core::parse::RawRecord>>,
        latency: Duration,
    ) -> Result<Vec<Task>, WorkerError> {
        let mut retries = Vec::new();
        let mut successes = 0usize;

        for (task, slot) in batch.into_iter().zip(slots) {
            let raw = match slot {
                Some(raw) => raw,
                None => {
                    tracing::warn!(
                        target = %task.target,
                        identifier = %task.identifier,
                        "Reply shortfall left this item without a record"
                    );
                    self.retry_or_fail(task, latency, &mut retries);
                    continue;
                }
            };

            match self.schema.normalize(raw) {
                Ok(record) => {
                    self.store
                        .write(&task.identifier, &task.target, &task.dedup_key, record)
                        .await?;
                    successes += 1;
                    self.metrics.outcome(TaskOutcome {
                        task_id: task.identifier,
                        target: task.target,
                        latency,
                        success: true,
                        attempts: task.attempt_count + 1,
                        timestamp: chrono::Utc::now(),
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        target = %task.target,
                        identifier = %task.identifier,
                        error = %err,
                        "Record rejected by schema"
                    );
                    self.retry_or_fail(task, latency, &mut retries);
                }
            }
        }

        if successes > 0 && self.connector.note_successes(successes) {
            self.metrics.reminder_issued(self.connector.target());
        }
        self.batcher.record(if retries.is_empty() {
            BatchSignal::Clean
        } else {
            BatchSignal::Retried
        });
        Ok(retries)
    }

    /// Apply the retry policy to every task of a failed batch.
    fn fail_or_collect(&mut self, batch: Vec<Task>, latency: Duration) -> Vec<Task> {
        let mut retries = Vec::new();
        for task in batch {
            self.retry_or_fail(task, latency, &mut retries);
        }
        retries
    }

    /// One failed attempt: requeue below the retry limit, otherwise
    /// report a terminal failure.
    fn retry_or_fail(&mut self, mut task: Task, latency: Duration, retries: &mut Vec<Task>) {
        let attempts_made = task.attempt_count + 1;
        if attempts_made < self.config.retry_limit {
            task.attempt_count = attempts_made;
            retries.push(task);
        } else {
            tracing::error!(
                target = %task.target,
                identifier = %task.identifier,
                attempts = attempts_made,
                "Task failed terminally"
            );
            self.metrics.outcome(TaskOutcome {
                task_id: task.identifier,
                target: task.target,
                latency,
                success: false,
                attempts: attempts_made,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    /// Finalize the queue on cancellation. Tasks whose retries were cut
    /// short are reported as aborted failures; untouched tasks stay
    /// pending for the next run, where planning dedup picks them up.
    fn drain(&mut self, queue: VecDeque<Task>) {
        self.transition(WorkerState::Draining);
        let mut aborted = 0usize;
        let mut untouched = 0usize;
        for task in queue {
            if task.attempt_count > 0 {
                aborted += 1;
                tracing::warn!(
                    target = %task.target,
                    identifier = %task.identifier,
                    attempts = task.attempt_count,
                    "shutdown_aborted"
                );
                self.metrics.outcome(TaskOutcome {
                    task_id: task.identifier,
                    target: task.target,
                    latency: Duration::ZERO,
                    success: false,
                    attempts: task.attempt_count,
                    timestamp: chrono::Utc::now(),
                });
            } else {
                untouched += 1;
            }
        }
        tracing::info!(
            target = %self.connector.target(),
            aborted,
            remaining = untouched,
            "Worker drained on shutdown"
        );
        self.transition(WorkerState::Stopped);
    }
}
