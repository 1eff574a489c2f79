use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::event::EventType;

/// What the connection manager should watch for once connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Account or token address to watch.
    pub target_address: String,
    #[serde(default)]
    pub event_types: BTreeSet<EventType>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl Subscription {
    pub fn new(id: impl Into<String>, target_address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            target_address: target_address.into(),
            event_types: BTreeSet::new(),
            is_active: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_types.insert(event_type);
        self
    }

    /// Registered but not subscribed on the live connection.
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}
