//! Pure snapshot aggregation over recorded outcomes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::event::TaskOutcome;

/// Aggregates for one backend target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetStats {
    pub processed: u64,
    pub success: u64,
    pub failed: u64,
    /// Failed share of processed, in percent.
    pub failure_rate: f64,
    pub average_latency_ms: f64,
    pub max_latency_ms: f64,
    pub total_attempts: u64,
    pub total_retries: u64,
    pub throughput_per_minute: f64,
}

/// One reporting-interval snapshot; serialized as a single JSON object
/// per line of the dated snapshot file.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// What produced this snapshot: `interval`, `outcome_count`,
    /// or `final`.
    pub trigger: String,
    pub generated_at: DateTime<Utc>,
    pub session_start: DateTime<Utc>,
    pub duration_seconds: f64,
    pub total_processed: u64,
    pub success: u64,
    pub failed: u64,
    pub failure_rate: f64,
    pub average_latency_ms: f64,
    pub max_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub throughput_per_minute: f64,
    pub total_attempts: u64,
    pub total_retries: u64,
    pub total_reminders: u64,
    pub reminders_per_target: BTreeMap<String, u64>,
    pub per_target: BTreeMap<String, TargetStats>,
}

/// Build a snapshot from every outcome recorded so far.
pub fn build_snapshot(
    trigger: &str,
    outcomes: &[TaskOutcome],
    reminders: &BTreeMap<String, u64>,
    session_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Snapshot {
    let duration_seconds = (now - session_start).num_milliseconds().max(0) as f64 / 1000.0;

    let mut latencies: Vec<f64> = outcomes
        .iter()
        .map(|o| o.latency.as_secs_f64() * 1000.0)
        .collect();
    latencies.sort_by(|a, b| a.partial_cmp(b).expect("latencies are finite"));

    let total = outcomes.len() as u64;
    let success = outcomes.iter().filter(|o| o.success).count() as u64;
    let failed = total - success;
    let total_attempts: u64 = outcomes.iter().map(|o| u64::from(o.attempts)).sum();
    let total_retries: u64 = outcomes
        .iter()
        .map(|o| u64::from(o.attempts.saturating_sub(1)))
        .sum();

    let mut per_target: BTreeMap<String, TargetStats> = BTreeMap::new();
    let mut grouped: BTreeMap<&str, Vec<&TaskOutcome>> = BTreeMap::new();
    for outcome in outcomes {
        grouped.entry(outcome.target.as_str()).or_default().push(outcome);
    }
    for (target, group) in grouped {
        let t_total = group.len() as u64;
        let t_success = group.iter().filter(|o| o.success).count() as u64;
        let t_failed = t_total - t_success;
        let t_latencies: Vec<f64> = group
            .iter()
            .map(|o| o.latency.as_secs_f64() * 1000.0)
            .collect();
        per_target.insert(
            target.to_string(),
            TargetStats {
                processed: t_total,
                success: t_success,
                failed: t_failed,
                failure_rate: rate(t_failed, t_total),
                average_latency_ms: mean(&t_latencies),
                max_latency_ms: t_latencies.iter().cloned().fold(0.0, f64::max),
                total_attempts: group.iter().map(|o| u64::from(o.attempts)).sum(),
                total_retries: group
                    .iter()
                    .map(|o| u64::from(o.attempts.saturating_sub(1)))
                    .sum(),
                throughput_per_minute: throughput(t_total, duration_seconds),
            },
        );
    }

    Snapshot {
        trigger: trigger.to_string(),
        generated_at: now,
        session_start,
        duration_seconds,
        total_processed: total,
        success,
        failed,
        failure_rate: rate(failed, total),
        average_latency_ms: mean(&latencies),
        max_latency_ms: latencies.iter().cloned().fold(0.0, f64::max),
        p50_latency_ms: percentile(&latencies, 0.50),
        p95_latency_ms: percentile(&latencies, 0.95),
        throughput_per_minute: throughput(total, duration_seconds),
        total_attempts,
        total_retries,
        total_reminders: reminders.values().sum(),
        reminders_per_target: reminders.clone(),
        per_target,
    }
}

fn rate(failed: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        failed as f64 / total as f64 * 100.0
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn throughput(count: u64, duration_seconds: f64) -> f64 {
    if duration_seconds <= 0.0 {
        0.0
    } else {
        count as f64 / duration_seconds * 60.0
    }
}

/// Nearest-rank percentile over an ascending-sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
