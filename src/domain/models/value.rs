//! Loosely typed values compared by trigger conditions.
//!
//! Condition values come from user-authored rules and are compared against
//! arbitrary JSON pulled out of event payloads. [`ConditionValue`] fixes the
//! set of shapes a rule value can take so that each operator has a defined
//! coercion per variant.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// A rule-side comparison value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Arrays and objects, compared structurally.
    Raw(JsonValue),
}

impl ConditionValue {
    /// Numeric coercion. Numeric strings parse, booleans are 1/0, null and
    /// empty strings are 0, everything else is NaN.
    pub fn as_number(&self) -> f64 {
        match self {
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Number(n) => *n,
            Self::String(s) => parse_numeric(s),
            Self::Raw(v) => json_as_number(Some(v)),
        }
    }

    /// String coercion used by `contains` and `regex`.
    pub fn as_text(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::String(s) => s.clone(),
            Self::Raw(v) => json_as_text(v),
        }
    }

    /// Strict per-variant equality against a resolved field value.
    pub fn matches_json(&self, field: &JsonValue) -> bool {
        match (self, field) {
            (Self::Null, JsonValue::Null) => true,
            (Self::Bool(a), JsonValue::Bool(b)) => a == b,
            (Self::Number(a), JsonValue::Number(b)) => b.as_f64().is_some_and(|b| *a == b),
            (Self::String(a), JsonValue::String(b)) => a == b,
            (Self::Raw(a), b) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for ConditionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

impl From<JsonValue> for ConditionValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => n.as_f64().map_or(Self::Raw(JsonValue::Number(n)), Self::Number),
            JsonValue::String(s) => Self::String(s),
            other => Self::Raw(other),
        }
    }
}

impl From<&str> for ConditionValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<f64> for ConditionValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for ConditionValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<bool> for ConditionValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Numeric coercion of an event-side value; `None` (unresolved path) is NaN.
pub fn json_as_number(value: Option<&JsonValue>) -> f64 {
    match value {
        None => f64::NAN,
        Some(JsonValue::Null) => 0.0,
        Some(JsonValue::Bool(b)) => f64::from(u8::from(*b)),
        Some(JsonValue::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(JsonValue::String(s)) => parse_numeric(s),
        Some(JsonValue::Array(_)) | Some(JsonValue::Object(_)) => f64::NAN,
    }
}

/// String coercion of an event-side value.
pub fn json_as_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.as_f64().map_or_else(|| n.to_string(), format_number),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn parse_numeric(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        0.0
    } else {
        trimmed.parse::<f64>().unwrap_or(f64::NAN)
    }
}

/// Integral floats print without a trailing `.0` so `150` stringifies as "150".
fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_untagged_deserialization() {
        let values: Vec<ConditionValue> =
            serde_json::from_value(json!([null, true, 100, "deposit", [1, 2], {"a": 1}])).unwrap();

        assert_eq!(values[0], ConditionValue::Null);
        assert_eq!(values[1], ConditionValue::Bool(true));
        assert_eq!(values[2], ConditionValue::Number(100.0));
        assert_eq!(values[3], ConditionValue::String("deposit".to_string()));
        assert!(matches!(values[4], ConditionValue::Raw(_)));
        assert!(matches!(values[5], ConditionValue::Raw(_)));
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(ConditionValue::from("42.5").as_number(), 42.5);
        assert_eq!(ConditionValue::from("").as_number(), 0.0);
        assert_eq!(ConditionValue::Bool(true).as_number(), 1.0);
        assert!(ConditionValue::from("abc").as_number().is_nan());

        assert!(json_as_number(None).is_nan());
        assert_eq!(json_as_number(Some(&json!("7"))), 7.0);
        assert!(json_as_number(Some(&json!({"x": 1}))).is_nan());
    }

    #[test]
    fn test_text_coercion() {
        assert_eq!(ConditionValue::Number(150.0).as_text(), "150");
        assert_eq!(ConditionValue::Number(1.5).as_text(), "1.5");
        assert_eq!(json_as_text(&json!(3)), "3");
        assert_eq!(json_as_text(&json!("SOL")), "SOL");
        assert_eq!(json_as_text(&json!(null)), "null");
    }

    #[test]
    fn test_strict_equality() {
        assert!(ConditionValue::Number(100.0).matches_json(&json!(100)));
        assert!(!ConditionValue::String("100".to_string()).matches_json(&json!(100)));
        assert!(ConditionValue::Raw(json!([1, 2])).matches_json(&json!([1, 2])));
        assert!(!ConditionValue::Null.matches_json(&json!(false)));
    }
}
