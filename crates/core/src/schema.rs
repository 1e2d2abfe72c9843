//! Data-driven record normalization.
//!
//! A [`Schema`] is an ordered table of field specs (name, kind,
//! required). One generic routine coerces a raw record against that
//! table instead of per-field branching: scalars stringify, lists
//! split, absent values fall back to safe defaults. An optional
//! [`LanguageGate`] rejects records whose text is predominantly
//! non-ASCII after a substitution pass.

use serde_json::Value;

use crate::parse::RawRecord;

/// Shape of one schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// A single string value.
    Scalar,
    /// A list of strings.
    List,
}

/// One entry in the schema table.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    /// Required scalars must be non-empty after coercion; required
    /// lists merely have to be lists (empty is allowed).
    pub required: bool,
}

impl FieldSpec {
    pub fn scalar(name: &str, required: bool) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Scalar,
            required,
        }
    }

    pub fn list(name: &str, required: bool) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::List,
            required,
        }
    }
}

/// Reasons a record is rejected. The caller drops the record and logs
/// the reason; rejection is never silent.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("required field \"{field}\" is empty after coercion")]
    EmptyRequiredField { field: String },

    #[error("ASCII-letter ratio {ratio:.2} below threshold {threshold:.2}")]
    LanguageMismatch { ratio: f64, threshold: f64 },
}

/// Optional language check applied after field coercion.
///
/// Computes the ASCII-letter share of all alphabetic characters across
/// string and list-string fields. Below `min_ascii_ratio`, the
/// substitution table is applied (accented and confusable characters
/// mapped to ASCII) and the ratio re-checked; a second failure rejects
/// the record.
#[derive(Debug, Clone)]
pub struct LanguageGate {
    pub min_ascii_ratio: f64,
}

impl Default for LanguageGate {
    fn default() -> Self {
        Self {
            min_ascii_ratio: 0.7,
        }
    }
}

/// Substitutions for characters backends commonly emit in place of
/// ASCII: accented Latin letters, smart punctuation, dashes.
const SUBSTITUTIONS: &[(char, &str)] = &[
    ('\u{00e0}', "a"),
    ('\u{00e1}', "a"),
    ('\u{00e2}', "a"),
    ('\u{00e4}', "a"),
    ('\u{00e8}', "e"),
    ('\u{00e9}', "e"),
    ('\u{00ea}', "e"),
    ('\u{00eb}', "e"),
    ('\u{00ec}', "i"),
    ('\u{00ed}', "i"),
    ('\u{00ee}', "i"),
    ('\u{00ef}', "i"),
    ('\u{00f2}', "o"),
    ('\u{00f3}', "o"),
    ('\u{00f4}', "o"),
    ('\u{00f6}', "o"),
    ('\u{00f9}', "u"),
    ('\u{00fa}', "u"),
    ('\u{00fb}', "u"),
    ('\u{00fc}', "u"),
    ('\u{00e7}', "c"),
    ('\u{00f1}', "n"),
    ('\u{2018}', "'"),
    ('\u{2019}', "'"),
    ('\u{201c}', "\""),
    ('\u{201d}', "\""),
    ('\u{2013}', "-"),
    ('\u{2014}', "-"),
];

impl LanguageGate {
    /// Check a normalized record, mutating its text fields in place if
    /// the substitution pass rescues it.
    fn check(&self, record: &mut RawRecord) -> Result<(), NormalizeError> {
        let ratio = ascii_letter_ratio(record);
        if ratio >= self.min_ascii_ratio {
            return Ok(());
        }

        for (_, value) in record.iter_mut() {
            substitute_value(value);
        }

        let ratio = ascii_letter_ratio(record);
        if ratio >= self.min_ascii_ratio {
            Ok(())
        } else {
            Err(NormalizeError::LanguageMismatch {
                ratio,
                threshold: self.min_ascii_ratio,
            })
        }
    }
}

/// Share of alphabetic characters that are ASCII, over every string
/// and list-of-string value in the record. A record with no alphabetic
/// content passes trivially (ratio 1.0).
fn ascii_letter_ratio(record: &RawRecord) -> f64 {
    let mut ascii = 0u64;
    let mut total = 0u64;
    for value in record.values() {
        for text in string_contents(value) {
            for ch in text.chars().filter(|c| c.is_alphabetic()) {
                total += 1;
                if ch.is_ascii_alphabetic() {
                    ascii += 1;
                }
            }
        }
    }
    if total == 0 {
        1.0
    } else {
        ascii as f64 / total as f64
    }
}

fn string_contents(value: &Value) -> Vec<&str> {
    match value {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().filter_map(|v| v.as_str()).collect(),
        _ => Vec::new(),
    }
}

fn substitute_value(value: &mut Value) {
    match value {
        Value::String(s) => *s = substitute_text(s),
        Value::Array(items) => {
            for item in items.iter_mut() {
                if let Value::String(s) = item {
                    *s = substitute_text(s);
                }
            }
        }
        _ => {}
    }
}

fn substitute_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    'chars: for ch in text.chars() {
        for (from, to) in SUBSTITUTIONS {
            if ch == *from {
                out.push_str(to);
                continue 'chars;
            }
        }
        out.push(ch);
    }
    out
}

/// Ordered field table driving [`Schema::normalize`].
#[derive(Debug, Clone)]
pub struct Schema {
    fields: Vec<FieldSpec>,
    language_gate: Option<LanguageGate>,
}

impl Schema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self {
            fields,
            language_gate: None,
        }
    }

    /// Enable the optional language check.
    pub fn with_language_gate(mut self, gate: LanguageGate) -> Self {
        self.language_gate = Some(gate);
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Coerce a raw record into the schema shape.
    ///
    /// Known fields are coerced per their kind; unknown extra fields
    /// pass through unchanged. Field order in the output follows the
    /// schema table first, extras after, so result files diff cleanly.
    pub fn normalize(&self, raw: RawRecord) -> Result<RawRecord, NormalizeError> {
        let mut raw = raw;
        let mut out = RawRecord::new();

        for spec in &self.fields {
            let value = raw.remove(&spec.name);
            match spec.kind {
                FieldKind::Scalar => {
                    let coerced = coerce_scalar(value);
                    if spec.required && coerced.is_empty() {
                        return Err(NormalizeError::EmptyRequiredField {
                            field: spec.name.clone(),
                        });
                    }
                    out.insert(spec.name.clone(), Value::String(coerced));
                }
                FieldKind::List => {
                    let items = coerce_list(value);
                    out.insert(
                        spec.name.clone(),
                        Value::Array(items.into_iter().map(Value::String).collect()),
                    );
                }
            }
        }

        // Passthrough for anything the schema does not name.
        for (key, value) in raw {
            out.insert(key, value);
        }

        if let Some(gate) = &self.language_gate {
            gate.check(&mut out)?;
        }

        Ok(out)
    }
}

/// Missing/null → `""`; strings pass through trimmed; anything else is
/// stringified (nested JSON compactly).
fn coerce_scalar(value: Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Missing/null → `[]`; a bare string splits on `,`/`;`/newline into
/// trimmed non-empty parts; array elements are scalar-coerced with
/// empties dropped.
fn coerce_list(value: Option<Value>) -> Vec<String> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => s
            .split([',', ';', '\n'])
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| coerce_scalar(Some(item)))
            .filter(|part| !part.is_empty())
            .collect(),
        Some(other) => {
            let coerced = coerce_scalar(Some(other));
            if coerced.is_empty() {
                Vec::new()
            } else {
                vec![coerced]
            }
        }
    }
}
