//! Owner-scoped trigger rules.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::event::EventType;
use super::value::ConditionValue;

/// Comparison applied by a single condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    Regex,
}

impl ConditionOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::Contains => "contains",
            Self::Regex => "regex",
        }
    }
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a condition's result folds into the running accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

/// One boolean test against a field of a canonical event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Dot-path into the serialized event, e.g. `parsedData.amount`.
    pub field: String,
    pub operator: ConditionOperator,
    pub value: ConditionValue,
    /// Ignored on the first condition of a list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_operator: Option<LogicalOperator>,
}

impl Condition {
    pub fn new(
        field: impl Into<String>,
        operator: ConditionOperator,
        value: impl Into<ConditionValue>,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
            logical_operator: None,
        }
    }

    pub fn and(mut self) -> Self {
        self.logical_operator = Some(LogicalOperator::And);
        self
    }

    pub fn or(mut self) -> Self {
        self.logical_operator = Some(LogicalOperator::Or);
        self
    }
}

/// A declarative rule owned by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub id: String,
    /// Filled in from the enclosing owner when registered.
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub event_type: EventType,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Minimum spacing between consecutive firings, in seconds.
    #[serde(default, with = "cooldown_secs", skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<Duration>,
    #[serde(default)]
    pub priority: i32,
}

fn default_active() -> bool {
    true
}

impl Trigger {
    pub fn new(id: impl Into<String>, owner_id: impl Into<String>, event_type: EventType) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            name: String::new(),
            is_active: true,
            event_type,
            conditions: Vec::new(),
            cooldown: None,
            priority: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_cooldown(mut self, secs: u64) -> Self {
        self.cooldown = Some(Duration::from_secs(secs));
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// All triggers for a single owner, as loaded from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerTriggers {
    pub owner_id: String,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
}

mod cooldown_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}
