//! Worker orchestration: task planning, per-target worker loops with
//! adaptive batch sizing, and run lifecycle.

pub mod batch;
pub mod plan;
pub mod runner;
pub mod worker;

pub use batch::{AdaptiveBatcher, BatchSignal};
pub use plan::plan_tasks;
pub use runner::run_workers;
pub use worker::{WorkerConfig, WorkerError};
