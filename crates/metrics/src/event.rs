//! Events workers send to the aggregator.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Terminal outcome of one task (success, or failure after the retry
/// budget was spent).
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: String,
    pub target: String,
    /// Latency of the batch request that settled this task.
    pub latency: Duration,
    pub success: bool,
    /// Attempts consumed, including the final one.
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

/// The aggregator's inbound message type.
#[derive(Debug, Clone)]
pub enum MetricsEvent {
    Outcome(TaskOutcome),
    /// A compliance reminder was injected into a target's session.
    ReminderIssued { target: String },
}
