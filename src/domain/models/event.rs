//! Canonical event model.
//!
//! Every inbound occurrence, whether it arrived as a webhook POST or as a push
//! message on the live connection, is normalized into a [`CanonicalEvent`]
//! before deduplication, buffering and trigger matching.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::str::FromStr;

/// Primary type tag of a canonical event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PriceChange,
    VolumeSpike,
    WhaleTransaction,
    LiquidityChange,
    TokenTransfer,
    Swap,
    Deposit,
    Withdrawal,
    AccountUpdate,
    NftSale,
    /// Anything the normalizer does not recognize.
    Custom,
}

impl EventType {
    pub const ALL: [EventType; 11] = [
        Self::PriceChange,
        Self::VolumeSpike,
        Self::WhaleTransaction,
        Self::LiquidityChange,
        Self::TokenTransfer,
        Self::Swap,
        Self::Deposit,
        Self::Withdrawal,
        Self::AccountUpdate,
        Self::NftSale,
        Self::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PriceChange => "price_change",
            Self::VolumeSpike => "volume_spike",
            Self::WhaleTransaction => "whale_transaction",
            Self::LiquidityChange => "liquidity_change",
            Self::TokenTransfer => "token_transfer",
            Self::Swap => "swap",
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::AccountUpdate => "account_update",
            Self::NftSale => "nft_sale",
            Self::Custom => "custom",
        }
    }

    /// Map a source tag to a known type, falling back to [`EventType::Custom`].
    ///
    /// Case-insensitive; `-` and spaces are treated as `_`, so
    /// `"PRICE-CHANGE"` and `"price change"` both resolve to `PriceChange`.
    pub fn from_tag(tag: &str) -> Self {
        let normalized: String = tag
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                other => other.to_ascii_lowercase(),
            })
            .collect();

        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .unwrap_or(Self::Custom)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_tag(s))
    }
}

/// The normalized, source-agnostic representation of an ingested occurrence.
///
/// Serialized with camelCase keys; trigger conditions address fields of this
/// serialized form by dot-path (`type`, `parsedData.amount`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEvent {
    /// `{type}_{timestamp_ms}_{fingerprint}`; redeliveries collide here.
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub source_signature: String,
    pub parsed_data: Map<String, JsonValue>,
    #[serde(default)]
    pub processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_error: Option<String>,
}

impl CanonicalEvent {
    /// Build the deterministic event id from its type, time and fingerprint.
    pub fn derive_id(event_type: EventType, timestamp: DateTime<Utc>, fingerprint: &str) -> String {
        format!("{}_{}_{}", event_type, timestamp.timestamp_millis(), fingerprint)
    }

    /// Record the dispatch outcome. Only the first call has any effect.
    pub fn mark_dispatched(&mut self, error: Option<String>) {
        if self.processed || self.processing_error.is_some() {
            return;
        }
        match error {
            Some(err) => self.processing_error = Some(err),
            None => self.processed = true,
        }
    }

    /// JSON view used for dot-path resolution.
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}
