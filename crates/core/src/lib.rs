//! Pure domain logic for the drover batch-dispatch engine.
//!
//! This crate has no I/O. It provides:
//!
//! - [`task`]: the unit of work flowing through per-target queues.
//! - [`parse`]: the cascading repair parser that recovers structured
//!   records from malformed backend replies.
//! - [`schema`]: the data-driven field normalizer that coerces raw
//!   records into a caller-defined shape.
//! - [`hash`]: dedup-key derivation from instruction text.

pub mod hash;
pub mod parse;
pub mod schema;
pub mod task;

pub use parse::{extract_records, ParseError, RawRecord};
pub use schema::{FieldKind, FieldSpec, LanguageGate, NormalizeError, Schema};
pub use task::{JobInput, Task};
