//! Fingerprinting and the bounded recency window used to drop redeliveries.
//!
//! Sources deliver at least once, so the same logical event can arrive
//! several times. Each raw payload is reduced to a short digest of its
//! identity-bearing fields; the [`DedupWindow`] remembers the most recent
//! digests and gates the rest of the pipeline.

use serde_json::{Map, Value as JsonValue};
use std::collections::{HashSet, VecDeque};

use super::normalizer::{base_fields, CHANGE_CHAIN, SUBJECT_CHAIN, TIMESTAMP_CHAIN, TYPE_CHAIN};

/// Hex characters kept from the blake3 digest.
const FINGERPRINT_LEN: usize = 16;

/// Deterministic short digest of a payload's identity fields.
///
/// Identity is `{kind, subject, change, timestamp, data}`, each located
/// through the same fallback chains the normalizer uses. `data` is the field
/// set the normalizer carries into `parsedData`: the `data` object, or every
/// non-envelope top-level field when there is none. Keys are sorted
/// recursively before hashing so field order never matters. A payload with
/// none of the identity fields is hashed whole.
///
/// Not a security primitive.
pub fn fingerprint(raw: &JsonValue) -> String {
    let mut identity = Map::new();
    for (key, chain) in [
        ("kind", &TYPE_CHAIN),
        ("subject", &SUBJECT_CHAIN),
        ("change", &CHANGE_CHAIN),
        ("timestamp", &TIMESTAMP_CHAIN),
    ] {
        if let Some(value) = chain.resolve(raw) {
            identity.insert(key.to_string(), value);
        }
    }
    if let JsonValue::Object(object) = raw {
        let data = base_fields(object);
        if !data.is_empty() {
            identity.insert("data".to_string(), JsonValue::Object(data));
        }
    }

    let basis = if identity.is_empty() {
        canonical_json(raw)
    } else {
        canonical_json(&JsonValue::Object(identity))
    };

    let digest = blake3::hash(basis.as_bytes()).to_hex();
    digest[..FINGERPRINT_LEN].to_string()
}

/// Serialize with object keys sorted at every depth.
pub fn canonical_json(value: &JsonValue) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&JsonValue::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Ordered set of the last N fingerprints.
///
/// Membership is a hash lookup and eviction pops the front of the order
/// list, both O(1). The set and the list are always mutated together, so
/// `len()` is the size of both.
#[derive(Debug, Clone)]
pub struct DedupWindow {
    capacity: usize,
    members: HashSet<String>,
    order: VecDeque<String>,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            members: HashSet::with_capacity(capacity + 1),
            order: VecDeque::with_capacity(capacity + 1),
        }
    }

    pub fn seen(&self, fingerprint: &str) -> bool {
        self.members.contains(fingerprint)
    }

    /// Add a fingerprint, evicting the oldest on overflow.
    ///
    /// Re-remembering a known fingerprint is a no-op and does not refresh
    /// its position. Returns whether the fingerprint was new.
    pub fn remember(&mut self, fingerprint: &str) -> bool {
        if self.members.contains(fingerprint) {
            return false;
        }
        self.members.insert(fingerprint.to_string());
        self.order.push_back(fingerprint.to_string());

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        debug_assert_eq!(self.members.len(), self.order.len());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fingerprints oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.order.iter()
    }
}
