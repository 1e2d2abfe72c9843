//! Outcome metrics and crash-recovery checkpoints.
//!
//! Workers emit [`MetricsEvent`]s on a channel; a single aggregator
//! task owns all mutable state, so no metrics lock exists anywhere.
//! The aggregator writes periodic [`Snapshot`]s to a dated JSONL file,
//! maintains checkpoint bookkeeping, and always emits a final summary
//! on any shutdown path.

pub mod aggregate;
pub mod aggregator;
pub mod checkpoint;
pub mod event;

pub use aggregate::{build_snapshot, Snapshot, TargetStats};
pub use aggregator::{spawn_aggregator, MetricsConfig, MetricsHandle};
pub use checkpoint::{latest_checkpoint, CheckpointState, CheckpointWriter};
pub use event::{MetricsEvent, TaskOutcome};
