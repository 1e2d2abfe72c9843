//! Task planning: expand jobs across targets and skip finished work.

use std::collections::{BTreeMap, VecDeque};

use drover_core::task::{JobInput, Task};
use drover_store::ResultStore;

/// Build per-target work queues from the job source.
///
/// Each (job, target) pair becomes a [`Task`] unless the store already
/// holds a record for it under the active dedup key, which makes
/// re-running a partially completed batch cheap. Queue order matches
/// job-source order. `cap` limits each target's queue for smoke runs.
pub fn plan_tasks(
    jobs: &[JobInput],
    targets: &[String],
    dedup_key: &str,
    store: &ResultStore,
    cap: Option<usize>,
) -> BTreeMap<String, VecDeque<Task>> {
    let mut queues: BTreeMap<String, VecDeque<Task>> = BTreeMap::new();
    let mut planned = 0usize;
    let mut skipped = 0usize;

    for target in targets {
        let queue = queues.entry(target.clone()).or_default();
        for job in jobs {
            if cap.is_some_and(|cap| queue.len() >= cap) {
                break;
            }
            if store.has_entry(&job.id, target, dedup_key) {
                skipped += 1;
                continue;
            }
            queue.push_back(Task::new(
                job.id.clone(),
                job.title.clone(),
                target.clone(),
                dedup_key.to_string(),
            ));
            planned += 1;
        }
    }

    tracing::info!(
        jobs = jobs.len(),
        targets = targets.len(),
        planned,
        skipped,
        "Planned work queues"
    );
    queues
}
