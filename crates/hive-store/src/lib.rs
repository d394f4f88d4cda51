//! The durable metadata store: `raft-state.json` plus an append-only
//! `raft-log.ndjson`, both living in a single node directory.
//!
//! State is the small mutable document a node needs on every election tick
//! (current term, who it voted for, the last committed index); the log is
//! an audit trail of how it got there, including every cluster event a node
//! has ever durably recorded. Neither file is ever partially visible to a
//! reader: the state file is written to a temp path and renamed into place,
//! and the log is opened in append mode so a torn write only ever touches
//! its own last line.

mod log;
mod state;

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use hive_core::NodeId;
use parking_lot::Mutex;
use snafu::{ResultExt, Snafu};

pub use log::{EntryType, LogEntry, NewLogEntry};
pub use state::{RaftStateDoc, StatePatch};

const LOG_TARGET: &str = "hive::store";
const STATE_FILE_NAME: &str = "raft-state.json";
const LOG_FILE_NAME: &str = "raft-log.ndjson";

#[derive(Debug, Snafu)]
pub enum StoreError {
    #[snafu(display("failed to create store directory {path:?}: {source}"))]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to read {path:?}: {source}"))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to write {path:?}: {source}"))]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize state: {source}"))]
    Serialize { source: serde_json::Error },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A node's durable metadata: raft state plus the append-only event/audit
/// log, both rooted at one directory.
pub struct DurableStore {
    dir: PathBuf,
    state: Mutex<RaftStateDoc>,
    known_event_ids: Mutex<HashSet<String>>,
}

impl DurableStore {
    /// Opens (creating if absent) the store rooted at `dir`. Reads the
    /// existing state file and replays the log to rebuild the in-memory
    /// event-id set and to advance `last_log_index`/`last_log_term` past
    /// whatever the state file alone claims, in case the process crashed
    /// between appending a log entry and persisting the state update.
    pub fn load(dir: impl Into<PathBuf>, node_id: NodeId) -> StoreResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).context(CreateDirSnafu { path: dir.clone() })?;

        let state_path = dir.join(STATE_FILE_NAME);
        let mut state = match std::fs::read_to_string(&state_path) {
            Ok(raw) => RaftStateDoc::parse_or_default(&node_id, &raw),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                RaftStateDoc::default_for(node_id.clone())
            }
            Err(source) => return Err(StoreError::Read { path: state_path, source }),
        };

        let log_path = dir.join(LOG_FILE_NAME);
        let entries = match std::fs::read_to_string(&log_path) {
            Ok(content) => log::parse_log_lines(&content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(StoreError::Read { path: log_path, source }),
        };

        let mut known_event_ids = HashSet::new();
        for entry in &entries {
            if let Some(event_id) = &entry.event_id {
                known_event_ids.insert(event_id.clone());
            }
            if entry.index > state.last_log_index {
                state.last_log_index = entry.index;
                state.last_log_term = entry.term;
            }
        }
        if state.commit_index < state.last_log_index {
            state.commit_index = state.last_log_index;
        }
        if state.last_applied < state.commit_index {
            state.last_applied = state.commit_index;
        }

        tracing::info!(
            target: LOG_TARGET,
            node_id = %node_id,
            log_entries = entries.len(),
            known_events = known_event_ids.len(),
            "loaded durable store"
        );

        let store = Self {
            dir,
            state: Mutex::new(state),
            known_event_ids: Mutex::new(known_event_ids),
        };
        store.write_state_file()?;
        Ok(store)
    }

    pub fn get_state(&self) -> RaftStateDoc {
        self.state.lock().clone()
    }

    /// Applies `patch` to the in-memory state and persists it atomically.
    pub fn set_state(&self, patch: StatePatch) -> StoreResult<RaftStateDoc> {
        let updated = {
            let mut state = self.state.lock();
            patch.apply_to(&mut state);
            state.clone()
        };
        self.write_state_file()?;
        Ok(updated)
    }

    pub fn has_event(&self, event_id: &str) -> bool {
        self.known_event_ids.lock().contains(event_id)
    }

    /// Appends one entry to the log, assigning a dense `index` and
    /// defaulting `term` to the current term. Advances `commit_index` and
    /// `last_applied` to the new index, since every entry in this
    /// single-writer log is immediately committed.
    pub fn append_entry(&self, new_entry: NewLogEntry) -> StoreResult<LogEntry> {
        let mut state = self.state.lock();
        let index = state.last_log_index + 1;
        let term = new_entry.term.unwrap_or(state.current_term);
        let entry = LogEntry {
            index,
            term,
            entry_type: new_entry.entry_type.unwrap_or(EntryType::Runtime),
            source_node_id: new_entry.source_node_id,
            event_id: new_entry.event_id,
            actor_id: new_entry.actor_id,
            actor_counter: new_entry.actor_counter,
            table_name: new_entry.table_name,
            row_id: new_entry.row_id,
            op: new_entry.op,
            payload_hash: new_entry.payload_hash,
            metadata: new_entry.metadata,
            created_at: hive_core::now_ms(),
        };

        self.append_line(&entry)?;
        if let Some(event_id) = &entry.event_id {
            self.known_event_ids.lock().insert(event_id.clone());
        }
        state.last_log_index = index;
        state.last_log_term = term;
        state.commit_index = index;
        state.last_applied = index;
        state.updated_at = hive_core::now_ms();
        let snapshot = state.clone();
        drop(state);
        self.write_state_file_from(&snapshot)?;
        Ok(entry)
    }

    /// Appends one `ClusterEvent`-typed log entry per event not already
    /// known, in the caller's order. Returns how many were newly appended;
    /// callers sort events by `(logical_ts, actor_id, actor_counter)`
    /// before calling this so the log records them in a stable order.
    pub fn append_cluster_events(
        &self,
        events: &[hive_core::ClusterEvent],
        term: u64,
    ) -> StoreResult<usize> {
        let mut appended = 0;
        for event in events {
            if self.has_event(&event.event_id) {
                continue;
            }
            let payload_hash = event.payload.as_ref().map(hive_core::hash_canonical);
            self.append_entry(NewLogEntry {
                entry_type: Some(EntryType::ClusterEvent),
                term: Some(term),
                event_id: Some(event.event_id.clone()),
                actor_id: Some(event.version.actor_id.clone()),
                actor_counter: Some(event.version.actor_counter),
                table_name: Some(event.table_name.clone()),
                row_id: Some(event.row_id.clone()),
                op: Some(
                    match event.op {
                        hive_core::Op::Upsert => "upsert",
                        hive_core::Op::Delete => "delete",
                    }
                    .to_string(),
                ),
                payload_hash,
                ..Default::default()
            })?;
            appended += 1;
        }
        Ok(appended)
    }

    fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE_NAME)
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE_NAME)
    }

    fn append_line(&self, entry: &LogEntry) -> StoreResult<()> {
        let path = self.log_path();
        let mut line = serde_json::to_string(entry).context(SerializeSnafu)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context(WriteSnafu { path: path.clone() })?;
        file.write_all(line.as_bytes())
            .context(WriteSnafu { path })
    }

    fn write_state_file(&self) -> StoreResult<()> {
        let snapshot = self.state.lock().clone();
        self.write_state_file_from(&snapshot)
    }

    /// Writes the state document to a sibling temp file then renames it
    /// into place, so a reader never observes a half-written file. Ignores
    /// a missing-directory error on rename, which only happens if the
    /// store directory was removed out from under a node mid-shutdown.
    fn write_state_file_from(&self, state: &RaftStateDoc) -> StoreResult<()> {
        let path = self.state_path();
        let tmp_path = self.dir.join(format!("{STATE_FILE_NAME}.tmp"));
        let body = serde_json::to_vec_pretty(state).context(SerializeSnafu)?;
        match std::fs::write(&tmp_path, &body) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => return Err(StoreError::Write { path: tmp_path, source }),
        }
        match std::fs::rename(&tmp_path, &path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Write { path, source }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use hive_core::{ClusterEvent, NodeId, Op};
    use tempfile::tempdir;

    use super::*;

    fn node(id: &str) -> NodeId {
        NodeId::new(id)
    }

    #[test]
    fn fresh_load_has_zeroed_state() {
        let dir = tempdir().unwrap();
        let store = DurableStore::load(dir.path(), node("n1")).unwrap();
        let state = store.get_state();
        assert_eq!(state.current_term, 0);
        assert_eq!(state.last_log_index, 0);
    }

    #[test]
    fn set_state_persists_across_reload() {
        let dir = tempdir().unwrap();
        {
            let store = DurableStore::load(dir.path(), node("n1")).unwrap();
            store
                .set_state(StatePatch {
                    current_term: Some(4),
                    voted_for: Some(Some(node("n2"))),
                    ..Default::default()
                })
                .unwrap();
        }
        let store = DurableStore::load(dir.path(), node("n1")).unwrap();
        let state = store.get_state();
        assert_eq!(state.current_term, 4);
        assert_eq!(state.voted_for, Some(node("n2")));
    }

    #[test]
    fn append_entry_assigns_dense_index_and_advances_commit() {
        let dir = tempdir().unwrap();
        let store = DurableStore::load(dir.path(), node("n1")).unwrap();
        let first = store.append_entry(NewLogEntry::runtime()).unwrap();
        let second = store.append_entry(NewLogEntry::runtime()).unwrap();
        assert_eq!(first.index, 1);
        assert_eq!(second.index, 2);
        let state = store.get_state();
        assert_eq!(state.last_log_index, 2);
        assert_eq!(state.commit_index, 2);
        assert_eq!(state.last_applied, 2);
    }

    #[test]
    fn cluster_events_are_deduplicated_by_event_id() {
        let dir = tempdir().unwrap();
        let store = DurableStore::load(dir.path(), node("n1")).unwrap();
        let event = ClusterEvent::new_local(
            &node("n1"),
            1,
            1000,
            "stories",
            "S-1",
            Op::Upsert,
            Some(serde_json::json!({"title": "hi"})),
        );
        let appended = store.append_cluster_events(&[event.clone()], 0).unwrap();
        assert_eq!(appended, 1);
        assert!(store.has_event(&event.event_id));
        let appended_again = store.append_cluster_events(&[event], 0).unwrap();
        assert_eq!(appended_again, 0);
    }

    #[test]
    fn reload_rebuilds_known_event_ids_from_log() {
        let dir = tempdir().unwrap();
        let event = ClusterEvent::new_local(
            &node("n1"),
            1,
            1000,
            "stories",
            "S-1",
            Op::Upsert,
            Some(serde_json::json!({"title": "hi"})),
        );
        {
            let store = DurableStore::load(dir.path(), node("n1")).unwrap();
            store.append_cluster_events(&[event.clone()], 0).unwrap();
        }
        let store = DurableStore::load(dir.path(), node("n1")).unwrap();
        assert!(store.has_event(&event.event_id));
    }

    #[test]
    fn a_corrupt_log_line_does_not_prevent_reload() {
        let dir = tempdir().unwrap();
        {
            let store = DurableStore::load(dir.path(), node("n1")).unwrap();
            store.append_entry(NewLogEntry::runtime()).unwrap();
        }
        let log_path = dir.path().join(LOG_FILE_NAME);
        let mut content = std::fs::read_to_string(&log_path).unwrap();
        content.push_str("{ this is not valid json\n");
        std::fs::write(&log_path, content).unwrap();

        let store = DurableStore::load(dir.path(), node("n1")).unwrap();
        let entry = store.append_entry(NewLogEntry::runtime()).unwrap();
        assert_eq!(entry.index, 2);
    }
}
