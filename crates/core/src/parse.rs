//! Cascading repair parser for backend reply text.
//!
//! Chat backends routinely wrap their JSON in markdown fences, leave
//! trailing commas, smash adjacent objects together, or surround the
//! payload with prose. [`extract_records`] runs a fixed cascade of
//! recovery stages and stops at the first one that yields at least one
//! record. It never panics; total failure is an explicit
//! [`ParseError::Unparseable`].

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// A record as recovered from reply text, before schema normalization.
pub type RawRecord = serde_json::Map<String, Value>;

/// Errors from the repair cascade.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Every recovery stage failed to produce a single record.
    #[error("no JSON records could be recovered from reply text")]
    Unparseable,
}

/// Matches brace-delimited fragments with no nested braces. Used by the
/// last-ditch recovery stage.
fn fragment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{[^{}]*\}").expect("fragment regex is valid"))
}

/// Recover an ordered list of records from raw reply text.
///
/// Cascade, first success wins:
/// 1. strip markdown code fences;
/// 2. trim to the outermost bracket span (`[...]` preferred over
///    `{...}`) and apply textual cleanups;
/// 3. direct parse;
/// 4. insert separators between smashed `}{` pairs, wrap as an array,
///    parse;
/// 5. regex-extract brace fragments from the original text and parse
///    each independently.
pub fn extract_records(raw: &str) -> Result<Vec<RawRecord>, ParseError> {
    let unfenced = strip_code_fences(raw);
    let trimmed = trim_to_bracket_span(&unfenced);
    let cleaned = cleanup(trimmed);

    if let Some(records) = parse_value_text(&cleaned) {
        return Ok(records);
    }

    // Re-join objects the backend smashed together without separators.
    let rejoined = cleaned.replace("}{", "},{").replace("} {", "},{");
    let wrapped = if rejoined.trim_start().starts_with('[') {
        rejoined
    } else {
        format!("[{rejoined}]")
    };
    if let Some(records) = parse_value_text(&wrapped) {
        return Ok(records);
    }

    // Last resort: harvest every standalone brace fragment from the
    // original text and keep whichever ones parse.
    let mut harvested = Vec::new();
    for m in fragment_regex().find_iter(raw) {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&cleanup(m.as_str())) {
            harvested.push(map);
        }
    }
    if harvested.is_empty() {
        Err(ParseError::Unparseable)
    } else {
        Ok(harvested)
    }
}

/// Drop markdown fence lines (```` ``` ```` or ```` ```json ````),
/// keeping everything between them.
fn strip_code_fences(text: &str) -> String {
    if !text.contains("```") {
        return text.to_string();
    }
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Narrow to the span between the first and last matching bracket.
///
/// An array span is preferred over an object span because batch
/// replies are expected to be arrays; surrounding prose falls away
/// either way.
fn trim_to_bracket_span(text: &str) -> &str {
    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(start), Some(end)) = (text.find(open), text.rfind(close)) {
            if start < end {
                return &text[start..=end];
            }
        }
    }
    text
}

/// Textual cleanups applied before every parse attempt: smart quotes,
/// trailing commas, collapsed whitespace.
fn cleanup(text: &str) -> String {
    static TRAILING_COMMA_ARR: OnceLock<Regex> = OnceLock::new();
    static TRAILING_COMMA_OBJ: OnceLock<Regex> = OnceLock::new();
    static MULTI_WS: OnceLock<Regex> = OnceLock::new();

    let text = text.replace(['\u{201c}', '\u{201d}'], "\"");
    let text = TRAILING_COMMA_ARR
        .get_or_init(|| Regex::new(r",\s*\]").expect("valid regex"))
        .replace_all(&text, "]");
    let text = TRAILING_COMMA_OBJ
        .get_or_init(|| Regex::new(r",\s*\}").expect("valid regex"))
        .replace_all(&text, "}");
    let text = text.replace(['\n', '\r', '\t'], " ");
    MULTI_WS
        .get_or_init(|| Regex::new(r"\s{2,}").expect("valid regex"))
        .replace_all(&text, " ")
        .trim()
        .to_string()
}

/// Parse one candidate text into records. A bare object becomes a
/// single-element list; an array keeps only its object elements.
fn parse_value_text(text: &str) -> Option<Vec<RawRecord>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(vec![map]),
        Ok(Value::Array(items)) => {
            let records: Vec<RawRecord> = items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect();
            if records.is_empty() {
                None
            } else {
                Some(records)
            }
        }
        _ => None,
    }
}
