//! Owner-scoped trigger registry and matcher.
//!
//! Owners register whole trigger lists at a time. Matching an event walks
//! every owner's active triggers, filters by event type, honours cooldowns
//! and evaluates conditions. Rule errors (an invalid regex, say) are caught
//! per trigger so one bad rule never hides the matches of another.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::ConditionError;
use crate::domain::models::{CanonicalEvent, Trigger};

use super::condition_evaluator::evaluate_json;

/// A trigger that matched an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerMatch {
    pub owner_id: String,
    pub trigger_id: String,
    pub trigger_name: String,
    pub priority: i32,
    pub event_id: String,
}

/// A trigger whose conditions could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFailure {
    pub owner_id: String,
    pub trigger_id: String,
    pub error: ConditionError,
}

/// Result of evaluating one event against the registry.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub matches: Vec<TriggerMatch>,
    pub failures: Vec<RuleFailure>,
}

/// Point-in-time registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub owners: usize,
    pub triggers: usize,
    pub active_triggers: usize,
    pub rule_errors: u64,
}

#[derive(Debug)]
struct OwnerEntry {
    /// Registration sequence; the key into `order`.
    seq: u64,
    triggers: Vec<Trigger>,
}

#[derive(Debug, Default)]
pub struct TriggerRegistry {
    owners: HashMap<String, OwnerEntry>,
    /// Registration sequence -> owner id, iterated for first-registration order.
    order: BTreeMap<u64, String>,
    next_seq: u64,
    /// Event timestamp of the last firing per `(owner, trigger)`.
    last_fired: HashMap<(String, String), DateTime<Utc>>,
    rule_errors: AtomicU64,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace an owner's trigger list.
    ///
    /// An existing owner keeps its registration position. Cooldown state
    /// survives for trigger ids that are still present.
    pub fn set_triggers(&mut self, owner_id: &str, triggers: Vec<Trigger>) {
        let triggers: Vec<Trigger> = triggers
            .into_iter()
            .map(|mut t| {
                t.owner_id = owner_id.to_string();
                t
            })
            .collect();

        self.last_fired.retain(|(owner, trigger_id), _| {
            owner != owner_id || triggers.iter().any(|t| &t.id == trigger_id)
        });

        match self.owners.get_mut(owner_id) {
            Some(entry) => entry.triggers = triggers,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.order.insert(seq, owner_id.to_string());
                self.owners.insert(owner_id.to_string(), OwnerEntry { seq, triggers });
            }
        }
        tracing::debug!(owner_id, "Trigger list replaced");
    }

    /// Remove every trigger an owner registered. Returns how many were removed.
    pub fn clear_triggers(&mut self, owner_id: &str) -> usize {
        self.last_fired.retain(|(owner, _), _| owner != owner_id);
        match self.owners.remove(owner_id) {
            Some(entry) => {
                self.order.remove(&entry.seq);
                entry.triggers.len()
            }
            None => 0,
        }
    }

    pub fn triggers_for(&self, owner_id: &str) -> &[Trigger] {
        self.owners
            .get(owner_id)
            .map(|entry| entry.triggers.as_slice())
            .unwrap_or(&[])
    }

    /// Owners and their lists in first-registration order.
    fn in_order(&self) -> impl Iterator<Item = (&String, &[Trigger])> {
        self.order
            .values()
            .filter_map(|owner_id| self.owners.get_key_value(owner_id))
            .map(|(owner_id, entry)| (owner_id, entry.triggers.as_slice()))
    }

    /// Evaluate an event without touching any registry state.
    ///
    /// Matches come back in descending priority; equal priorities keep owner
    /// registration order, then list order.
    pub fn evaluate_event(&self, event: &CanonicalEvent) -> MatchOutcome {
        let serialized = event.to_json();
        let mut outcome = MatchOutcome::default();

        for (owner_id, triggers) in self.in_order() {
            for trigger in triggers {
                if !trigger.is_active || trigger.event_type != event.event_type {
                    continue;
                }
                if self.in_cooldown(owner_id, trigger, event.timestamp) {
                    continue;
                }
                match evaluate_json(&trigger.conditions, &serialized) {
                    Ok(true) => outcome.matches.push(TriggerMatch {
                        owner_id: owner_id.clone(),
                        trigger_id: trigger.id.clone(),
                        trigger_name: trigger.name.clone(),
                        priority: trigger.priority,
                        event_id: event.id.clone(),
                    }),
                    Ok(false) => {}
                    Err(error) => outcome.failures.push(RuleFailure {
                        owner_id: owner_id.clone(),
                        trigger_id: trigger.id.clone(),
                        error,
                    }),
                }
            }
        }

        // Stable sort keeps registration order among equal priorities.
        outcome.matches.sort_by(|a, b| b.priority.cmp(&a.priority));
        outcome
    }

    /// Matching triggers for an event. Rule failures are logged and counted,
    /// and the failing trigger is treated as non-matching.
    pub fn find_matches(&self, event: &CanonicalEvent) -> Vec<TriggerMatch> {
        let outcome = self.evaluate_event(event);
        for failure in &outcome.failures {
            self.rule_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                owner_id = %failure.owner_id,
                trigger_id = %failure.trigger_id,
                event_id = %event.id,
                error = %failure.error,
                "Trigger rule evaluation failed"
            );
        }
        outcome.matches
    }

    /// Record that a trigger fired for an event at `at`, starting its cooldown.
    pub fn record_fired(&mut self, owner_id: &str, trigger_id: &str, at: DateTime<Utc>) {
        self.last_fired
            .insert((owner_id.to_string(), trigger_id.to_string()), at);
    }

    pub fn last_fired(&self, owner_id: &str, trigger_id: &str) -> Option<DateTime<Utc>> {
        self.last_fired
            .get(&(owner_id.to_string(), trigger_id.to_string()))
            .copied()
    }

    /// Whether a registered trigger is inside its cooldown at `at`.
    pub fn cooling_down(&self, owner_id: &str, trigger_id: &str, at: DateTime<Utc>) -> bool {
        self.triggers_for(owner_id)
            .iter()
            .find(|t| t.id == trigger_id)
            .is_some_and(|trigger| self.in_cooldown(owner_id, trigger, at))
    }

    fn in_cooldown(&self, owner_id: &str, trigger: &Trigger, at: DateTime<Utc>) -> bool {
        let Some(cooldown) = trigger.cooldown else {
            return false;
        };
        let Some(fired) = self.last_fired(owner_id, &trigger.id) else {
            return false;
        };
        match chrono::Duration::from_std(cooldown) {
            Ok(cooldown) => at < fired + cooldown,
            Err(_) => true,
        }
    }

    pub fn stats(&self) -> RegistryStats {
        let all = self.owners.values().flat_map(|entry| entry.triggers.iter());
        RegistryStats {
            owners: self.owners.len(),
            triggers: all.clone().count(),
            active_triggers: all.filter(|t| t.is_active).count(),
            rule_errors: self.rule_errors.load(Ordering::Relaxed),
        }
    }
}
