use hive_core::{ClusterEvent, NodeId, Op};
use hive_db::{Database, DbResult};

use crate::TableRegistry;

/// Detects local mutations in every registered table since the last scan
/// and records them as cluster events.
///
/// For each table: diff the adapter's current rows against the stored
/// `{row_id -> row_hash}` snapshot. A new or changed hash emits an
/// `upsert`; a row_id present in the snapshot but absent from the current
/// scan emits a `delete`. Returns the number of events emitted.
pub fn scan_local_changes(
    db: &Database,
    registry: &TableRegistry,
    node_id: &NodeId,
) -> DbResult<usize> {
    let mut emitted = 0;
    for table_name in registry.table_names() {
        let adapter = registry.get(table_name).expect("table_names() only yields registered tables");

        let previous = db.row_hashes_for_table(table_name)?;
        let current_rows = db.with_connection(|conn| {
            adapter
                .ensure_schema(conn)
                .and_then(|()| adapter.select_all(conn))
                .map_err(|source| hive_db::DbError::Sqlite { source })
        })?;

        let mut seen_row_ids = std::collections::HashSet::new();
        for payload in &current_rows {
            let Some(row_id) = adapter.row_id(payload) else {
                continue;
            };
            seen_row_ids.insert(row_id.clone());
            let hash = hive_core::hash_canonical(payload);
            if previous.get(&row_id) == Some(&hash) {
                continue;
            }
            emit_local_event(db, node_id, table_name, &row_id, Op::Upsert, Some(payload.clone()))?;
            db.row_hash_set(table_name, &row_id, &hash)?;
            emitted += 1;
        }

        for row_id in previous.keys() {
            if seen_row_ids.contains(row_id) {
                continue;
            }
            emit_local_event(db, node_id, table_name, row_id, Op::Delete, None)?;
            db.row_hash_clear(table_name, row_id)?;
            emitted += 1;
        }
    }
    Ok(emitted)
}

fn emit_local_event(
    db: &Database,
    node_id: &NodeId,
    table_name: &str,
    row_id: &str,
    op: Op,
    payload: Option<serde_json::Value>,
) -> DbResult<()> {
    let counter = db.cluster_state_next_counter()?;
    let event = ClusterEvent::new_local(
        node_id,
        counter,
        hive_core::now_ms(),
        table_name,
        row_id,
        op,
        payload,
    );
    db.cluster_events_insert(&event)?;
    db.row_version_set(table_name, row_id, &event.version)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use hive_db::Database;
    use serde_json::json;

    use super::*;
    use crate::tables::register_builtin_tables;

    fn setup() -> (Database, TableRegistry, NodeId) {
        let db = Database::open_in_memory().unwrap();
        let node_id = NodeId::new("node-a");
        db.cluster_state_ensure(&node_id).unwrap();
        let mut registry = TableRegistry::new();
        register_builtin_tables(&mut registry);
        (db, registry, node_id)
    }

    #[test]
    fn new_row_emits_upsert_event() {
        let (db, registry, node_id) = setup();
        let stories = registry.get("stories").unwrap();
        db.with_connection(|conn| {
            stories
                .ensure_schema(conn)
                .and_then(|()| stories.upsert(conn, &json!({"id": "S-1", "title": "a"})))
                .map_err(|source| hive_db::DbError::Sqlite { source })
        })
        .unwrap();

        let emitted = scan_local_changes(&db, &registry, &node_id).unwrap();
        assert_eq!(emitted, 1);
        let events = db.cluster_events_all_ordered().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].op, Op::Upsert);

        // A second scan with no change emits nothing.
        assert_eq!(scan_local_changes(&db, &registry, &node_id).unwrap(), 0);
    }

    #[test]
    fn deleted_row_emits_delete_event_and_clears_hash() {
        let (db, registry, node_id) = setup();
        let stories = registry.get("stories").unwrap();
        db.with_connection(|conn| {
            stories
                .ensure_schema(conn)
                .and_then(|()| stories.upsert(conn, &json!({"id": "S-1", "title": "a"})))
                .map_err(|source| hive_db::DbError::Sqlite { source })
        })
        .unwrap();
        scan_local_changes(&db, &registry, &node_id).unwrap();

        db.with_connection(|conn| {
            stories.delete(conn, "S-1").map_err(|source| hive_db::DbError::Sqlite { source })
        })
        .unwrap();
        let emitted = scan_local_changes(&db, &registry, &node_id).unwrap();
        assert_eq!(emitted, 1);
        let events = db.cluster_events_all_ordered().unwrap();
        assert_eq!(events[1].op, Op::Delete);
        assert!(db.row_hashes_for_table("stories").unwrap().is_empty());
    }
}
