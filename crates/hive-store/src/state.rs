use hive_core::NodeId;
use serde::{Deserialize, Serialize};

/// The durable raft state document, `raft-state.json`. All integer fields
/// are sanitized to non-negative on load; malformed JSON falls back to a
/// clean default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftStateDoc {
    pub node_id: NodeId,
    pub current_term: u64,
    pub voted_for: Option<NodeId>,
    pub leader_id: Option<NodeId>,
    pub commit_index: u64,
    pub last_applied: u64,
    pub last_log_index: u64,
    pub last_log_term: u64,
    pub updated_at: i64,
}

impl RaftStateDoc {
    pub fn default_for(node_id: NodeId) -> Self {
        Self {
            node_id,
            current_term: 0,
            voted_for: None,
            leader_id: None,
            commit_index: 0,
            last_applied: 0,
            last_log_index: 0,
            last_log_term: 0,
            updated_at: hive_core::now_ms(),
        }
    }

    /// Parses a possibly-malformed on-disk document, clamping every integer
    /// field to non-negative and falling back to a clean default for this
    /// node on any parse failure.
    pub fn parse_or_default(node_id: &NodeId, raw: &str) -> Self {
        match serde_json::from_str::<RawRaftStateDoc>(raw) {
            Ok(raw) => raw.sanitize(node_id),
            Err(_) => Self::default_for(node_id.clone()),
        }
    }
}

/// Mirrors [`RaftStateDoc`] but accepts signed integers so we can detect and
/// clamp negative values instead of failing to parse them outright.
#[derive(Debug, Deserialize)]
struct RawRaftStateDoc {
    node_id: Option<String>,
    #[serde(default)]
    current_term: i64,
    voted_for: Option<String>,
    leader_id: Option<String>,
    #[serde(default)]
    commit_index: i64,
    #[serde(default)]
    last_applied: i64,
    #[serde(default)]
    last_log_index: i64,
    #[serde(default)]
    last_log_term: i64,
    #[serde(default)]
    updated_at: i64,
}

fn clamp(value: i64) -> u64 {
    value.max(0) as u64
}

impl RawRaftStateDoc {
    fn sanitize(self, fallback_node_id: &NodeId) -> RaftStateDoc {
        RaftStateDoc {
            node_id: self
                .node_id
                .map(NodeId::new)
                .unwrap_or_else(|| fallback_node_id.clone()),
            current_term: clamp(self.current_term),
            voted_for: self.voted_for.map(NodeId::new),
            leader_id: self.leader_id.map(NodeId::new),
            commit_index: clamp(self.commit_index),
            last_applied: clamp(self.last_applied),
            last_log_index: clamp(self.last_log_index),
            last_log_term: clamp(self.last_log_term),
            updated_at: self.updated_at,
        }
    }
}

/// A patch applied to the in-memory state before it is persisted. Every
/// field left `None` keeps its previous value; `updated_at` is always
/// stamped at apply time.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub current_term: Option<u64>,
    pub voted_for: Option<Option<NodeId>>,
    pub leader_id: Option<Option<NodeId>>,
    pub commit_index: Option<u64>,
    pub last_applied: Option<u64>,
    pub last_log_index: Option<u64>,
    pub last_log_term: Option<u64>,
}

impl StatePatch {
    pub fn apply_to(self, state: &mut RaftStateDoc) {
        if let Some(v) = self.current_term {
            state.current_term = v;
        }
        if let Some(v) = self.voted_for {
            state.voted_for = v;
        }
        if let Some(v) = self.leader_id {
            state.leader_id = v;
        }
        if let Some(v) = self.commit_index {
            state.commit_index = v;
        }
        if let Some(v) = self.last_applied {
            state.last_applied = v;
        }
        if let Some(v) = self.last_log_index {
            state.last_log_index = v;
        }
        if let Some(v) = self.last_log_term {
            state.last_log_term = v;
        }
        state.updated_at = hive_core::now_ms();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_json_falls_back_to_default() {
        let node_id = NodeId::new("n1");
        let state = RaftStateDoc::parse_or_default(&node_id, "{ not json");
        assert_eq!(state, RaftStateDoc::default_for(node_id));
    }

    #[test]
    fn negative_integers_are_clamped() {
        let node_id = NodeId::new("n1");
        let raw = r#"{"node_id":"n1","current_term":-5,"commit_index":-1,
            "last_applied":-1,"last_log_index":-1,"last_log_term":-1,"updated_at":0}"#;
        let state = RaftStateDoc::parse_or_default(&node_id, raw);
        assert_eq!(state.current_term, 0);
        assert_eq!(state.commit_index, 0);
        assert_eq!(state.last_applied, 0);
    }
}
