//! Dot-path lookup and ordered fallback chains over JSON payloads.
//!
//! Inbound payloads use different (and historically renamed) field names for
//! the same fact. A [`CandidateChain`] lists the accepted spellings in
//! priority order; the first one that resolves and survives its transform
//! wins. Keeping the order in data makes it auditable and testable on its own.

use serde_json::Value as JsonValue;

/// Resolve a dot-separated path. Objects are indexed by key, arrays by
/// numeric segment. Any segment that fails to resolve yields `None`.
pub fn resolve_path<'a>(root: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    if path.is_empty() {
        return Some(root);
    }
    path.split('.').try_fold(root, |current, segment| match current {
        JsonValue::Object(map) => map.get(segment),
        JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Converts a resolved value into the normalized form, or rejects it.
pub type Transform = fn(&JsonValue) -> Option<JsonValue>;

/// One accepted location for a field.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub path: &'static str,
    pub transform: Transform,
}

impl Candidate {
    pub const fn new(path: &'static str, transform: Transform) -> Self {
        Self { path, transform }
    }
}

/// Ordered, first-match-wins list of candidates for one normalized field.
#[derive(Debug, Clone, Copy)]
pub struct CandidateChain {
    pub name: &'static str,
    pub candidates: &'static [Candidate],
}

impl CandidateChain {
    /// First candidate that resolves to a non-null value accepted by its
    /// transform.
    pub fn resolve(&self, payload: &JsonValue) -> Option<JsonValue> {
        self.candidates.iter().find_map(|c| {
            resolve_path(payload, c.path)
                .filter(|v| !v.is_null())
                .and_then(c.transform)
        })
    }

    /// Like [`resolve`](Self::resolve) but also reports which path matched.
    pub fn resolve_with_path(&self, payload: &JsonValue) -> Option<(&'static str, JsonValue)> {
        self.candidates.iter().find_map(|c| {
            resolve_path(payload, c.path)
                .filter(|v| !v.is_null())
                .and_then(c.transform)
                .map(|v| (c.path, v))
        })
    }
}

/// Pass the value through unchanged.
pub fn identity(value: &JsonValue) -> Option<JsonValue> {
    Some(value.clone())
}

/// Accept non-empty strings only.
pub fn non_empty_string(value: &JsonValue) -> Option<JsonValue> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(JsonValue::String(s.trim().to_string())),
        _ => None,
    }
}

/// Accept strings and numbers, rendered as a string.
pub fn as_string(value: &JsonValue) -> Option<JsonValue> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(JsonValue::String(s.trim().to_string())),
        JsonValue::Number(n) => Some(JsonValue::String(n.to_string())),
        _ => None,
    }
}

/// Lower-cased string, for enumerations like direction.
pub fn lowercase_string(value: &JsonValue) -> Option<JsonValue> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => {
            Some(JsonValue::String(s.trim().to_ascii_lowercase()))
        }
        _ => None,
    }
}

/// Numbers, or strings that parse as numbers.
pub fn number(value: &JsonValue) -> Option<JsonValue> {
    to_f64(value).and_then(|n| serde_json::Number::from_f64(n).map(JsonValue::Number))
}

/// Absolute value of a number.
pub fn absolute_number(value: &JsonValue) -> Option<JsonValue> {
    to_f64(value).and_then(|n| serde_json::Number::from_f64(n.abs()).map(JsonValue::Number))
}

/// Strip a trailing `%` before parsing.
pub fn percentage(value: &JsonValue) -> Option<JsonValue> {
    match value {
        JsonValue::String(s) => number(&JsonValue::String(s.trim().trim_end_matches('%').to_string())),
        other => number(other),
    }
}

fn to_f64(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}
