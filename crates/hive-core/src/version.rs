use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::NodeId;

/// `(actor_id, actor_counter, logical_ts)` attached to every cluster event.
///
/// Total order between two versions is lexicographic on
/// `(logical_ts, actor_id, actor_counter)`; `actor_id` ties break on
/// case-sensitive lexical compare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausalVersion {
    pub actor_id: NodeId,
    pub actor_counter: u64,
    pub logical_ts: i64,
}

impl CausalVersion {
    pub fn new(actor_id: NodeId, actor_counter: u64, logical_ts: i64) -> Self {
        Self {
            actor_id,
            actor_counter,
            logical_ts,
        }
    }

    fn order_key(&self) -> (i64, &str, u64) {
        (self.logical_ts, self.actor_id.as_str(), self.actor_counter)
    }
}

impl PartialOrd for CausalVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CausalVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order_key().cmp(&other.order_key())
    }
}

/// `actor_id -> max actor_counter observed`, derived on demand from stored
/// events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionVector(HashMap<String, u64>);

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: HashMap<String, u64>) -> Self {
        Self(map)
    }

    /// Counter this vector has observed for `actor_id`; `0` if unknown.
    /// Non-finite, negative, or non-numeric entries supplied over the wire
    /// are sanitized to `0` by the caller before construction.
    pub fn get(&self, actor_id: &str) -> u64 {
        self.0.get(actor_id).copied().unwrap_or(0)
    }

    pub fn set(&mut self, actor_id: impl Into<String>, counter: u64) {
        let actor_id = actor_id.into();
        let entry = self.0.entry(actor_id).or_insert(0);
        if counter > *entry {
            *entry = counter;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn as_map(&self) -> &HashMap<String, u64> {
        &self.0
    }

    /// Sanitizes an arbitrary JSON-decoded map the way the `/events/delta`
    /// endpoint must: non-finite, negative, or non-numeric entries are
    /// dropped rather than rejecting the whole request.
    pub fn from_json_map(map: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut vector = Self::new();
        for (actor_id, value) in map {
            if let Some(counter) = value.as_f64() {
                if counter.is_finite() && counter >= 0.0 {
                    vector.set(actor_id.clone(), counter as u64);
                }
            }
        }
        vector
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(actor: &str, counter: u64, ts: i64) -> CausalVersion {
        CausalVersion::new(NodeId::new(actor), counter, ts)
    }

    #[test]
    fn orders_by_logical_ts_first() {
        assert!(v("a", 5, 10) < v("a", 1, 20));
    }

    #[test]
    fn ties_on_ts_order_by_actor_id() {
        assert!(v("a", 99, 10) < v("b", 1, 10));
    }

    #[test]
    fn ties_on_ts_and_actor_order_by_counter() {
        assert!(v("a", 1, 10) < v("a", 2, 10));
    }

    #[test]
    fn version_vector_sanitizes_malformed_entries() {
        let map = serde_json::json!({
            "a": 3,
            "b": -1,
            "c": f64::NAN,
            "d": "nope",
        });
        let vector = VersionVector::from_json_map(map.as_object().unwrap());
        assert_eq!(vector.get("a"), 3);
        assert_eq!(vector.get("b"), 0);
        assert_eq!(vector.get("c"), 0);
        assert_eq!(vector.get("d"), 0);
    }

    #[test]
    fn set_keeps_maximum() {
        let mut vector = VersionVector::new();
        vector.set("a", 5);
        vector.set("a", 2);
        assert_eq!(vector.get("a"), 5);
        vector.set("a", 9);
        assert_eq!(vector.get("a"), 9);
    }
}
