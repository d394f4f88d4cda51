use serde::{Deserialize, Serialize};

use crate::{CausalVersion, NodeId};

/// Whether a cluster event upserts or removes a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Upsert,
    Delete,
}

/// An immutable record of a single row-level change, local or remote.
///
/// `event_id` is `"{actor_id}:{actor_counter}"` and is globally unique by
/// construction. `payload` is `None` for deletes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterEvent {
    pub event_id: String,
    pub table_name: String,
    pub row_id: String,
    pub op: Op,
    pub payload: Option<serde_json::Value>,
    pub version: CausalVersion,
    pub created_at: i64,
}

impl ClusterEvent {
    /// Builds the event for a freshly observed local change. The caller is
    /// responsible for having already bumped and persisted the actor's
    /// counter.
    pub fn new_local(
        node_id: &NodeId,
        actor_counter: u64,
        logical_ts: i64,
        table_name: impl Into<String>,
        row_id: impl Into<String>,
        op: Op,
        payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_id: format_event_id(node_id.as_str(), actor_counter),
            table_name: table_name.into(),
            row_id: row_id.into(),
            op,
            payload,
            version: CausalVersion::new(node_id.clone(), actor_counter, logical_ts),
            created_at: logical_ts,
        }
    }
}

pub fn format_event_id(actor_id: &str, actor_counter: u64) -> String {
    format!("{actor_id}:{actor_counter}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_is_actor_and_counter() {
        let node = NodeId::new("node-a");
        let event = ClusterEvent::new_local(
            &node,
            7,
            1000,
            "stories",
            "S-1",
            Op::Upsert,
            Some(serde_json::json!({"title": "x"})),
        );
        assert_eq!(event.event_id, "node-a:7");
    }
}
