//! Boolean evaluation of trigger conditions against a canonical event.
//!
//! Field paths address the event's serialized (camelCase) form, so
//! `type`, `timestamp` and `parsedData.amount` are all reachable. A path
//! that does not resolve is "undefined": it is never equal to anything,
//! never contains anything, and coerces to NaN for ordering.

use regex::Regex;
use serde_json::Value as JsonValue;

use crate::domain::errors::ConditionError;
use crate::domain::models::value::{json_as_number, json_as_text};
use crate::domain::models::{CanonicalEvent, Condition, ConditionOperator, LogicalOperator};

use super::field_path::resolve_path;

/// Evaluate a condition list against an event.
///
/// An empty list matches. Results are combined by a linear left fold: the
/// first condition seeds the accumulator and each later condition folds in
/// with its own logical operator (AND when unset). There is no precedence,
/// so `a OR b AND c` means `(a OR b) AND c`.
pub fn evaluate(conditions: &[Condition], event: &CanonicalEvent) -> Result<bool, ConditionError> {
    evaluate_json(conditions, &event.to_json())
}

/// [`evaluate`] over an already serialized event, so callers matching many
/// triggers serialize once.
pub fn evaluate_json(conditions: &[Condition], event: &JsonValue) -> Result<bool, ConditionError> {
    let mut iter = conditions.iter();
    let Some(first) = iter.next() else {
        return Ok(true);
    };

    let mut acc = evaluate_condition(first, event)?;
    for condition in iter {
        let result = evaluate_condition(condition, event)?;
        acc = match condition.logical_operator.unwrap_or_default() {
            LogicalOperator::And => acc && result,
            LogicalOperator::Or => acc || result,
        };
    }
    Ok(acc)
}

/// Evaluate one condition against a serialized event.
pub fn evaluate_condition(condition: &Condition, event: &JsonValue) -> Result<bool, ConditionError> {
    let field = resolve_path(event, &condition.field);
    let expected = &condition.value;

    let result = match condition.operator {
        ConditionOperator::Equals => field.is_some_and(|f| expected.matches_json(f)),
        ConditionOperator::NotEquals => !field.is_some_and(|f| expected.matches_json(f)),
        // NaN on either side makes both comparisons false.
        ConditionOperator::GreaterThan => json_as_number(field) > expected.as_number(),
        ConditionOperator::LessThan => json_as_number(field) < expected.as_number(),
        ConditionOperator::Contains => {
            field.is_some_and(|f| json_as_text(f).contains(&expected.as_text()))
        }
        ConditionOperator::Regex => {
            let pattern = expected.as_text();
            let re = Regex::new(&pattern).map_err(|e| ConditionError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            field.is_some_and(|f| re.is_match(&json_as_text(f)))
        }
    };
    Ok(result)
}
