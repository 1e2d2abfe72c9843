//! Work-item types shared across the engine.

use serde::{Deserialize, Serialize};

/// One entry supplied by the external job source: an identifier plus
/// the text to be processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInput {
    /// Stable identifier; also the result file stem (`<id>.json`).
    pub id: String,
    /// Free text handed to the backend (a title, headline, etc.).
    pub title: String,
}

/// One (identifier, target, dedup key) job owned by a single worker.
///
/// Created by the planner, mutated only by its owning worker
/// (`attempt_count` increments on retry), and destroyed on terminal
/// success or failure.
#[derive(Debug, Clone)]
pub struct Task {
    pub identifier: String,
    pub input_text: String,
    /// Backend target name this task is pinned to.
    pub target: String,
    /// Content hash of the active instruction text; results for the
    /// same identifier but a different instruction version live side
    /// by side under this key.
    pub dedup_key: String,
    pub attempt_count: u32,
}

impl Task {
    pub fn new(identifier: String, input_text: String, target: String, dedup_key: String) -> Self {
        Self {
            identifier,
            input_text,
            target,
            dedup_key,
            attempt_count: 0,
        }
    }
}
