//! The on-disk result document and its merge rules.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A normalized record as persisted under one
/// (target, dedup key) slot.
pub type Record = serde_json::Map<String, Value>;

/// One result file: `<identifier>.json`.
///
/// The `title` is hoisted out of the first record that carries one;
/// everything else lives under `llm_models[target][dedup_key]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultDocument {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub llm_models: BTreeMap<String, BTreeMap<String, Value>>,
}

impl ResultDocument {
    /// Load a document, treating a missing or corrupt file as empty.
    ///
    /// Corruption is recoverable by design: the merge re-creates the
    /// document from the incoming record and subsequent writers fill
    /// the rest back in.
    pub fn load_or_empty(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Corrupt result document; starting from empty"
                    );
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Merge one record into `llm_models[target][dedup_key]`,
    /// overwriting any previous entry for that slot.
    ///
    /// The record's `title` field is hoisted to the top level and
    /// removed from the nested record. An existing non-empty title is
    /// kept; a conflicting non-empty incoming title is warned about.
    pub fn merge(&mut self, target: &str, dedup_key: &str, mut record: Record) {
        let incoming_title = record
            .remove("title")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        if !incoming_title.is_empty() {
            if self.title.is_empty() {
                self.title = incoming_title;
            } else if self.title != incoming_title {
                tracing::warn!(
                    existing = %self.title,
                    incoming = %incoming_title,
                    target,
                    "Conflicting titles for result document; keeping existing"
                );
            }
        }

        self.llm_models
            .entry(target.to_string())
            .or_default()
            .insert(dedup_key.to_string(), Value::Object(record));
    }

    /// Whether a record already exists for this (target, dedup key).
    pub fn has_entry(&self, target: &str, dedup_key: &str) -> bool {
        self.llm_models
            .get(target)
            .is_some_and(|by_key| by_key.contains_key(dedup_key))
    }
}
