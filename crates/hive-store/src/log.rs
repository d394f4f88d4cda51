use hive_core::NodeId;
use serde::{Deserialize, Serialize};

/// The kind of a durable log entry. `ClusterEvent` entries are the ones
/// consulted for replay dedup; the rest are an audit trail of election and
/// runtime activity that a restarted node never needs to reinterpret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Runtime,
    ElectionStart,
    ElectionWon,
    VoteGranted,
    HeartbeatSent,
    HeartbeatReceived,
    StateTransition,
    ClusterEvent,
}

/// One append-only line of `raft-log.ndjson`. Every field beyond `index`,
/// `term`, `type` and `created_at` is optional and only populated for the
/// entry kinds that need it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_node_id: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub actor_id: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub actor_counter: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub table_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub row_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub op: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payload_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<serde_json::Value>,
    pub created_at: i64,
}

/// Fields a caller supplies when appending; `index`, `term` defaults and
/// `created_at` are filled in by [`crate::DurableStore::append_entry`].
#[derive(Debug, Clone, Default)]
pub struct NewLogEntry {
    pub entry_type: Option<EntryType>,
    pub term: Option<u64>,
    pub source_node_id: Option<NodeId>,
    pub event_id: Option<String>,
    pub actor_id: Option<NodeId>,
    pub actor_counter: Option<u64>,
    pub table_name: Option<String>,
    pub row_id: Option<String>,
    pub op: Option<String>,
    pub payload_hash: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl NewLogEntry {
    pub fn runtime() -> Self {
        Self {
            entry_type: Some(EntryType::Runtime),
            ..Default::default()
        }
    }

    pub fn of_type(entry_type: EntryType) -> Self {
        Self {
            entry_type: Some(entry_type),
            ..Default::default()
        }
    }
}

/// Parses the log file content, skipping any line that fails to deserialize
/// (a torn write from a crash mid-append) instead of failing the whole load.
pub fn parse_log_lines(content: &str) -> Vec<LogEntry> {
    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<LogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(err) => {
                tracing::warn!(
                    target: crate::LOG_TARGET,
                    err = %err,
                    "skipping malformed log line on load"
                );
            }
        }
    }
    entries
}
