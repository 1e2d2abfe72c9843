//! Batch-dispatch worker binary.
//!
//! Reads a job list and system instruction, plans per-target queues
//! against the result store, and drives one worker per backend target
//! until the queues drain or Ctrl-C cancels the run.

mod config;

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use drover_backend::{Connector, HttpTransport, SessionConfig};
use drover_core::hash::dedup_key;
use drover_core::schema::{FieldSpec, LanguageGate, Schema};
use drover_core::task::JobInput;
use drover_metrics::{latest_checkpoint, MetricsConfig};
use drover_runner::{plan_tasks, run_workers, WorkerConfig};
use drover_store::{ResultStore, StoreConfig};

use crate::config::RunConfig;

/// The record shape requested from every backend. `title` is hoisted
/// to the document's top level by the store merge.
fn record_schema() -> Schema {
    Schema::new(vec![
        FieldSpec::scalar("title", true),
        FieldSpec::scalar("core_event", true),
        FieldSpec::list("themes", true),
        FieldSpec::scalar("tone", true),
        FieldSpec::scalar("conflict_type", true),
        FieldSpec::scalar("stakes", true),
        FieldSpec::scalar("setting_hint", true),
        FieldSpec::list("characters", true),
        FieldSpec::list("potential_story_hooks", true),
    ])
    .with_language_gate(LanguageGate::default())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drover_worker=info,drover_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RunConfig::from_env()?;

    let instruction = std::fs::read_to_string(&config.instruction_path).with_context(|| {
        format!(
            "Failed to read instruction file {}",
            config.instruction_path.display()
        )
    })?;
    let dedup = dedup_key(&instruction);

    let jobs: Vec<JobInput> = serde_json::from_str(
        &std::fs::read_to_string(&config.jobs_path)
            .with_context(|| format!("Failed to read jobs file {}", config.jobs_path.display()))?,
    )
    .context("Jobs file is not a JSON array of {id, title} objects")?;

    tracing::info!(
        jobs = jobs.len(),
        targets = config.targets.len(),
        dedup_key = %dedup,
        out_dir = %config.out_dir.display(),
        "Starting run"
    );

    let store = Arc::new(ResultStore::new(&config.out_dir, StoreConfig::default())?);

    if let Some(checkpoint) = latest_checkpoint(&config.out_dir) {
        tracing::info!(
            completed = checkpoint.total_completed,
            failed = checkpoint.total_failed,
            last = checkpoint.last_identifier.as_deref().unwrap_or("-"),
            "Previous run checkpoint found; store dedup will skip finished work"
        );
    }

    let target_names: Vec<String> = config.targets.iter().map(|t| t.name.clone()).collect();
    let queues = plan_tasks(&jobs, &target_names, &dedup, &store, config.task_cap);

    let session_config = SessionConfig {
        max_turns: config.max_turns,
        reminder_interval: config.reminder_interval,
    };
    let connectors: Vec<Connector<HttpTransport>> = config
        .targets
        .iter()
        .map(|target| {
            Connector::start(
                &target.name,
                HttpTransport::new(target.url.clone(), config.request_timeout),
                &instruction,
                session_config.clone(),
            )
        })
        .collect();

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Ctrl-C received; finishing in-flight batches then draining");
            ctrl_c_token.cancel();
        }
    });

    let worker_config = WorkerConfig {
        retry_limit: config.retry_limit,
        max_batch_size: config.max_batch_size,
        ..WorkerConfig::default()
    };
    let summary = run_workers(
        connectors,
        queues,
        Arc::new(record_schema()),
        Arc::clone(&store),
        &config.out_dir,
        worker_config,
        MetricsConfig::default(),
        cancel,
    )
    .await;

    tracing::info!(
        processed = summary.total_processed,
        success = summary.success,
        failed = summary.failed,
        reminders = summary.total_reminders,
        "Run finished"
    );
    Ok(())
}
