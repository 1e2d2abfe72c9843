//! Run lifecycle: spawn one worker per target, wait, flush, summarize.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use drover_backend::{ChatTransport, Connector};
use drover_core::schema::Schema;
use drover_core::task::Task;
use drover_metrics::{spawn_aggregator, MetricsConfig, Snapshot};
use drover_store::ResultStore;

use crate::worker::{run_worker, WorkerConfig};

/// Run every planned queue to completion (or cancellation) and return
/// the final run summary.
///
/// Each connector is paired with its target's queue; targets missing
/// from `queues` get an empty queue and finish immediately. A worker
/// that fails internally is logged and does not stop the others. The
/// store is flushed and the aggregator joined on every path out.
pub async fn run_workers<T: ChatTransport + 'static>(
    connectors: Vec<Connector<T>>,
    mut queues: BTreeMap<String, VecDeque<Task>>,
    schema: Arc<Schema>,
    store: Arc<ResultStore>,
    out_dir: &Path,
    worker_config: WorkerConfig,
    metrics_config: MetricsConfig,
    cancel: CancellationToken,
) -> Snapshot {
    let planned_total: u64 = queues.values().map(|q| q.len() as u64).sum();
    let (metrics, aggregator) = spawn_aggregator(out_dir, metrics_config, planned_total);

    let mut handles = Vec::with_capacity(connectors.len());
    for mut connector in connectors {
        let queue = queues.remove(connector.target()).unwrap_or_default();
        let schema = Arc::clone(&schema);
        let store = Arc::clone(&store);
        let metrics = metrics.clone();
        let cancel = cancel.clone();
        let config = worker_config.clone();
        handles.push(tokio::spawn(async move {
            let target = connector.target().to_string();
            let result = run_worker(
                &mut connector,
                queue,
                &schema,
                &store,
                &metrics,
                &cancel,
                &config,
            )
            .await;
            (target, result)
        }));
    }
    for (target, queue) in &queues {
        tracing::warn!(target = %target, tasks = queue.len(), "No connector for planned target");
    }

    for handle in handles {
        match handle.await {
            Ok((_, Ok(()))) => {}
            Ok((target, Err(err))) => {
                tracing::error!(target = %target, error = %err, "Worker halted");
            }
            Err(err) => {
                tracing::error!(error = %err, "Worker task panicked");
            }
        }
    }

    if let Err(err) = store.flush_all().await {
        tracing::error!(error = %err, "Final store flush failed");
    }

    // Closing the last sender makes the aggregator emit its final
    // snapshot and finish.
    drop(metrics);
    match aggregator.await {
        Ok(summary) => summary,
        Err(err) => {
            tracing::error!(error = %err, "Metrics aggregator panicked");
            let now = chrono::Utc::now();
            drover_metrics::build_snapshot("final", &[], &BTreeMap::new(), now, now)
        }
    }
}
