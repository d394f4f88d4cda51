use hive_core::{CausalVersion, ClusterEvent, NodeId, Op};

use crate::{Database, DbResult};

/// A `cluster_events` row as read back from storage.
pub type StoredEvent = ClusterEvent;

fn op_str(op: Op) -> &'static str {
    match op {
        Op::Upsert => "upsert",
        Op::Delete => "delete",
    }
}

fn op_from_str(s: &str) -> Op {
    match s {
        "delete" => Op::Delete,
        _ => Op::Upsert,
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClusterEvent> {
    let payload: Option<String> = row.get(4)?;
    Ok(ClusterEvent {
        event_id: row.get(0)?,
        table_name: row.get(1)?,
        row_id: row.get(2)?,
        op: op_from_str(&row.get::<_, String>(3)?),
        payload: payload.map(|p| serde_json::from_str(&p).unwrap_or(serde_json::Value::Null)),
        version: CausalVersion::new(
            NodeId::new(row.get::<_, String>(5)?),
            row.get::<_, i64>(6)? as u64,
            row.get::<_, i64>(7)?,
        ),
        created_at: row.get(8)?,
    })
}

const SELECT_COLUMNS: &str = "event_id, table_name, row_id, op, payload, \
     actor_id, actor_counter, logical_ts, created_at";

impl Database {
    /// `INSERT OR IGNORE` of a single event, keyed by `event_id`. Returns
    /// `true` if a new row was inserted.
    pub fn cluster_events_insert(&self, event: &ClusterEvent) -> DbResult<bool> {
        let payload = event
            .payload
            .as_ref()
            .map(|p| serde_json::to_string(p).expect("Value always serializes"));
        let changed = self.run(
            &format!(
                "INSERT OR IGNORE INTO cluster_events ({SELECT_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            &[
                &event.event_id,
                &event.table_name,
                &event.row_id,
                &op_str(event.op),
                &payload,
                &event.version.actor_id.as_str(),
                &(event.version.actor_counter as i64),
                &event.version.logical_ts,
                &event.created_at,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn cluster_events_has(&self, event_id: &str) -> DbResult<bool> {
        Ok(self
            .query_one(
                "SELECT 1 FROM cluster_events WHERE event_id = ?1",
                &[&event_id],
                |_| Ok(()),
            )?
            .is_some())
    }

    /// All events in `(logical_ts, actor_id, actor_counter)` order, the
    /// iteration order delta selection walks.
    pub fn cluster_events_all_ordered(&self) -> DbResult<Vec<ClusterEvent>> {
        self.query_all(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM cluster_events \
                 ORDER BY logical_ts ASC, actor_id ASC, actor_counter ASC"
            ),
            &[],
            row_to_event,
        )
    }

    /// The most recent `limit` events, used to refresh the in-process delta
    /// cache after a sync cycle.
    pub fn cluster_events_recent(&self, limit: u32) -> DbResult<Vec<ClusterEvent>> {
        self.query_all(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM cluster_events \
                 ORDER BY logical_ts DESC, actor_id DESC, actor_counter DESC \
                 LIMIT ?1"
            ),
            &[&limit],
            row_to_event,
        )
    }

    /// Version vector derived from `MAX(actor_counter) GROUP BY actor_id`.
    pub fn cluster_events_version_vector(&self) -> DbResult<hive_core::VersionVector> {
        let rows: Vec<(String, i64)> = self.query_all(
            "SELECT actor_id, MAX(actor_counter) FROM cluster_events GROUP BY actor_id",
            &[],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let mut vector = hive_core::VersionVector::new();
        for (actor_id, counter) in rows {
            vector.set(actor_id, counter as u64);
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use hive_core::now_ms;

    use super::*;

    fn sample_event(actor: &str, counter: u64) -> ClusterEvent {
        ClusterEvent::new_local(
            &NodeId::new(actor),
            counter,
            now_ms(),
            "stories",
            "S-1",
            Op::Upsert,
            Some(serde_json::json!({"title": "hi"})),
        )
    }

    #[test]
    fn insert_is_idempotent_by_event_id() {
        let db = Database::open_in_memory().unwrap();
        let event = sample_event("node-a", 1);
        assert!(db.cluster_events_insert(&event).unwrap());
        assert!(!db.cluster_events_insert(&event).unwrap());
        assert!(db.cluster_events_has(&event.event_id).unwrap());
    }

    #[test]
    fn version_vector_tracks_max_per_actor() {
        let db = Database::open_in_memory().unwrap();
        db.cluster_events_insert(&sample_event("node-a", 1)).unwrap();
        db.cluster_events_insert(&sample_event("node-a", 2)).unwrap();
        db.cluster_events_insert(&sample_event("node-b", 1)).unwrap();
        let vector = db.cluster_events_version_vector().unwrap();
        assert_eq!(vector.get("node-a"), 2);
        assert_eq!(vector.get("node-b"), 1);
    }
}
