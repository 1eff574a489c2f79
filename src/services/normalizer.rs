//! Ingestion normalizer: raw payload -> [`CanonicalEvent`].
//!
//! Payloads arrive in whatever shape the source emits, and older producers
//! use legacy field names. Every field the normalizer extracts is described
//! by a [`CandidateChain`]; the chain order is the precedence order.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value as JsonValue};

use crate::domain::errors::NormalizeError;
use crate::domain::models::{CanonicalEvent, EventType};

use super::deduplicator::fingerprint;
use super::field_path::{
    absolute_number, as_string, identity, lowercase_string, non_empty_string, number, percentage,
    Candidate, CandidateChain,
};

/// Millisecond timestamps are at least this large; smaller numbers are seconds.
const MILLIS_THRESHOLD: f64 = 1e12;

pub static TYPE_CHAIN: CandidateChain = CandidateChain {
    name: "type",
    candidates: &[
        Candidate::new("type", non_empty_string),
        Candidate::new("eventType", non_empty_string),
        Candidate::new("event_type", non_empty_string),
        Candidate::new("event", non_empty_string),
        Candidate::new("name", non_empty_string),
        Candidate::new("kind", non_empty_string),
    ],
};

pub static TIMESTAMP_CHAIN: CandidateChain = CandidateChain {
    name: "timestamp",
    candidates: &[
        Candidate::new("timestamp", identity),
        Candidate::new("time", identity),
        Candidate::new("ts", identity),
        Candidate::new("blockTime", identity),
        Candidate::new("createdAt", identity),
        Candidate::new("created_at", identity),
    ],
};

pub static SIGNATURE_CHAIN: CandidateChain = CandidateChain {
    name: "signature",
    candidates: &[
        Candidate::new("signature", as_string),
        Candidate::new("txSignature", as_string),
        Candidate::new("transactionSignature", as_string),
        Candidate::new("sourceSignature", as_string),
        Candidate::new("webhookId", as_string),
        Candidate::new("id", as_string),
    ],
};

pub static SUBJECT_CHAIN: CandidateChain = CandidateChain {
    name: "subject",
    candidates: &[
        Candidate::new("token", as_string),
        Candidate::new("tokenAddress", as_string),
        Candidate::new("mint", as_string),
        Candidate::new("account", as_string),
        Candidate::new("accountAddress", as_string),
        Candidate::new("address", as_string),
        Candidate::new("data.token", as_string),
        Candidate::new("data.mint", as_string),
        Candidate::new("data.account", as_string),
    ],
};

pub static CHANGE_CHAIN: CandidateChain = CandidateChain {
    name: "change",
    candidates: &[
        Candidate::new("change", identity),
        Candidate::new("changeType", identity),
        Candidate::new("change_type", identity),
    ],
};

/// Convenience fields written into `parsedData`, in output order.
pub static NORMALIZED_FIELDS: [CandidateChain; 7] = [
    CandidateChain {
        name: "direction",
        candidates: &[
            Candidate::new("direction", lowercase_string),
            Candidate::new("change.direction", lowercase_string),
            Candidate::new("data.direction", lowercase_string),
            Candidate::new("changeDirection", lowercase_string),
            Candidate::new("trend", lowercase_string),
            Candidate::new("side", lowercase_string),
        ],
    },
    CandidateChain {
        name: "percentage",
        candidates: &[
            Candidate::new("percentage", percentage),
            Candidate::new("change.percentage", percentage),
            Candidate::new("data.percentage", percentage),
            Candidate::new("percentChange", percentage),
            Candidate::new("percent_change", percentage),
            Candidate::new("changePercent", percentage),
            Candidate::new("priceChangePercent", percentage),
        ],
    },
    CandidateChain {
        name: "delta",
        candidates: &[
            Candidate::new("delta", absolute_number),
            Candidate::new("change.absolute", absolute_number),
            Candidate::new("change.delta", absolute_number),
            Candidate::new("data.delta", absolute_number),
            Candidate::new("absoluteChange", absolute_number),
            Candidate::new("amountChange", absolute_number),
            Candidate::new("change.amount", absolute_number),
        ],
    },
    CandidateChain {
        name: "from",
        candidates: &[
            Candidate::new("from", identity),
            Candidate::new("change.from", identity),
            Candidate::new("data.from", identity),
            Candidate::new("previousValue", identity),
            Candidate::new("oldValue", identity),
            Candidate::new("previous", identity),
        ],
    },
    CandidateChain {
        name: "to",
        candidates: &[
            Candidate::new("to", identity),
            Candidate::new("change.to", identity),
            Candidate::new("data.to", identity),
            Candidate::new("currentValue", identity),
            Candidate::new("newValue", identity),
            Candidate::new("current", identity),
        ],
    },
    CandidateChain {
        name: "window",
        candidates: &[
            Candidate::new("window", identity),
            Candidate::new("change.window", identity),
            Candidate::new("data.window", identity),
            Candidate::new("timeWindow", identity),
            Candidate::new("timeframe", identity),
            Candidate::new("period", identity),
        ],
    },
    CandidateChain {
        name: "threshold",
        candidates: &[
            Candidate::new("threshold", number),
            Candidate::new("data.threshold", number),
            Candidate::new("trigger.threshold", number),
            Candidate::new("thresholdValue", number),
            Candidate::new("limit", number),
        ],
    },
];

/// Key under which the untouched payload is preserved.
pub const RAW_KEY: &str = "raw";

/// Converts raw inbound payloads to canonical events.
///
/// Stateless: normalizing the same payload twice yields identical events,
/// which is what makes side-effect-free previews possible.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize one payload, computing its fingerprint.
    pub fn normalize(&self, raw: &JsonValue) -> Result<CanonicalEvent, NormalizeError> {
        let fp = fingerprint(raw);
        self.normalize_fingerprinted(raw, &fp)
    }

    /// Normalize one payload whose fingerprint is already known.
    pub fn normalize_fingerprinted(
        &self,
        raw: &JsonValue,
        fingerprint: &str,
    ) -> Result<CanonicalEvent, NormalizeError> {
        let object = raw.as_object().ok_or_else(|| NormalizeError::NotAnObject(json_kind(raw)))?;

        let event_type = TYPE_CHAIN
            .resolve(raw)
            .and_then(|v| v.as_str().map(EventType::from_tag))
            .unwrap_or(EventType::Custom);

        let timestamp = TIMESTAMP_CHAIN
            .resolve(raw)
            .ok_or(NormalizeError::MissingTimestamp)
            .and_then(|v| parse_timestamp(&v))?;

        let source_signature = SIGNATURE_CHAIN
            .resolve(raw)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| fingerprint.to_string());

        let mut parsed_data = base_fields(object);
        for chain in &NORMALIZED_FIELDS {
            if let Some(value) = chain.resolve(raw) {
                parsed_data.insert(chain.name.to_string(), value);
            }
        }
        parsed_data.insert(RAW_KEY.to_string(), raw.clone());

        Ok(CanonicalEvent {
            id: CanonicalEvent::derive_id(event_type, timestamp, fingerprint),
            event_type,
            timestamp,
            source_signature,
            parsed_data,
            processed: false,
            processing_error: None,
        })
    }

    /// Normalize a batch in array order. One result per input item; a bad
    /// item never prevents the rest from normalizing.
    pub fn normalize_batch(&self, batch: &[JsonValue]) -> Vec<Result<CanonicalEvent, NormalizeError>> {
        batch.iter().map(|raw| self.normalize(raw)).collect()
    }
}

/// Fields carried into `parsedData` before normalization: the `data` object
/// when present, otherwise every top-level field that is not envelope.
pub fn base_fields(object: &Map<String, JsonValue>) -> Map<String, JsonValue> {
    if let Some(JsonValue::Object(data)) = object.get("data") {
        return data.clone();
    }

    let envelope: Vec<&str> = [&TYPE_CHAIN, &TIMESTAMP_CHAIN, &SIGNATURE_CHAIN]
        .iter()
        .flat_map(|chain| chain.candidates.iter().map(|c| c.path))
        .collect();

    object
        .iter()
        .filter(|(key, _)| !envelope.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Accepts epoch seconds, epoch milliseconds, numeric strings of either,
/// and RFC 3339 strings.
pub fn parse_timestamp(value: &JsonValue) -> Result<DateTime<Utc>, NormalizeError> {
    let invalid = || NormalizeError::InvalidTimestamp(value.to_string());

    let epoch = match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => match s.trim().parse::<f64>() {
            Ok(n) => Some(n),
            Err(_) => {
                return DateTime::parse_from_rfc3339(s.trim())
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|_| invalid());
            }
        },
        _ => None,
    }
    .filter(|n| n.is_finite() && *n >= 0.0)
    .ok_or_else(invalid)?;

    let millis = if epoch < MILLIS_THRESHOLD {
        (epoch * 1000.0).round() as i64
    } else {
        epoch.round() as i64
    };

    Utc.timestamp_millis_opt(millis).single().ok_or_else(invalid)
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
