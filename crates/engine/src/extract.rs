//! Recovery of one JSON document from noisy model output.
//!
//! Any JSON value is recovered; callers that need a section map go through
//! [`extract_or_placeholder`], which only accepts objects.
//!
//! Strategies run in order and the first success wins. Each is a pure
//! `&str -> Option<Value>` so the chain stays flat.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use snafu::ResultExt;

use crate::error::{DocumentNotFoundSnafu, DocumentShapeSnafu, EngineResult};

const FENCE: &str = "```";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Verbatim,
    FencedBlock,
    BraceScan,
    WholeString,
}

/// Either one complete document or nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionResult {
    Found { value: Value, strategy: Strategy },
    NotFound,
}

impl ExtractionResult {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Found { value, .. } => Some(value),
            Self::NotFound => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Found { value, .. } => Some(value),
            Self::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }
}

type StrategyFn = fn(&str) -> Option<Value>;

const STRATEGIES: [(Strategy, StrategyFn); 4] = [
    (Strategy::Verbatim, verbatim),
    (Strategy::FencedBlock, fenced_block),
    (Strategy::BraceScan, brace_scan),
    (Strategy::WholeString, whole_string),
];

pub fn extract(text: &str) -> ExtractionResult {
    for (strategy, attempt) in STRATEGIES {
        if let Some(value) = attempt(text) {
            tracing::debug!(strategy = ?strategy, text_len = text.len(), "structured document recovered");
            return ExtractionResult::Found { value, strategy };
        }
    }

    tracing::warn!(
        text_len = text.len(),
        "no structured document recovered from model output"
    );
    ExtractionResult::NotFound
}

/// Extracts and deserializes into a caller-defined document type.
pub fn extract_as<T>(text: &str) -> EngineResult<T>
where
    T: DeserializeOwned,
{
    let Some(value) = extract(text).into_value() else {
        return DocumentNotFoundSnafu {
            stage: "extract-as",
        }
        .fail();
    };

    serde_json::from_value(value).context(DocumentShapeSnafu {
        stage: "extract-as-deserialize",
    })
}

/// Soft-failure document: every expected field holds an excerpt of the raw text.
pub fn placeholder_document<S>(fields: &[S], raw: &str, excerpt_chars: usize) -> Value
where
    S: AsRef<str>,
{
    let excerpt = excerpt(raw, excerpt_chars);
    let document = fields
        .iter()
        .map(|field| (field.as_ref().to_string(), Value::String(excerpt.clone())))
        .collect::<Map<_, _>>();
    Value::Object(document)
}

pub fn extract_or_placeholder<S>(text: &str, fields: &[S], excerpt_chars: usize) -> Value
where
    S: AsRef<str>,
{
    match extract(text) {
        ExtractionResult::Found { value, .. } if value.is_object() => value,
        found => {
            tracing::info!(
                field_count = fields.len(),
                excerpt_chars,
                recovered_non_object = found.is_found(),
                "substituting placeholder document for unrecoverable output"
            );
            placeholder_document(fields, text, excerpt_chars)
        }
    }
}

fn verbatim(text: &str) -> Option<Value> {
    parse_value(strip_outer_fence(text))
}

fn fenced_block(text: &str) -> Option<Value> {
    let mut cursor = text;
    while let Some(open) = cursor.find(FENCE) {
        let after_open = &cursor[open + FENCE.len()..];
        let close = after_open.find(FENCE)?;
        let interior = skip_language_tag(&after_open[..close]);
        if interior.contains('{') && interior.contains('}') {
            return parse_value(interior.trim());
        }
        cursor = &after_open[close + FENCE.len()..];
    }
    None
}

/// Walks from the first `{` to its matching `}` with strings opaque to the depth count.
///
/// A backslash inside a string escapes exactly the next character.
fn brace_scan(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_pending = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escape_pending {
                escape_pending = false;
            } else if ch == '\\' {
                escape_pending = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return parse_value(&text[start..end]);
                }
            }
            _ => {}
        }
    }

    // Ran out of input with open braces: truncated output.
    None
}

fn whole_string(text: &str) -> Option<Value> {
    parse_value(text.trim())
}

fn parse_value(candidate: &str) -> Option<Value> {
    serde_json::from_str::<Value>(candidate).ok()
}

fn strip_outer_fence(text: &str) -> &str {
    let mut body = text.trim();

    if let Some(rest) = body.strip_prefix(FENCE) {
        body = match rest.find('\n') {
            Some(newline) if is_language_tag(&rest[..newline]) => &rest[newline + 1..],
            Some(_) => rest,
            None => rest.trim_start_matches(|ch: char| ch.is_ascii_alphanumeric()),
        };
    }

    if let Some(rest) = body.trim_end().strip_suffix(FENCE) {
        body = rest;
    }

    body.trim()
}

fn skip_language_tag(block: &str) -> &str {
    match block.find('\n') {
        Some(newline) if is_language_tag(&block[..newline]) => &block[newline + 1..],
        _ => block,
    }
}

fn is_language_tag(line: &str) -> bool {
    line.trim()
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '+' | '.'))
}

fn excerpt(raw: &str, max_chars: usize) -> String {
    let trimmed = raw.trim();
    let mut chars = trimmed.chars();
    let head = chars.by_ref().take(max_chars).collect::<String>();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
