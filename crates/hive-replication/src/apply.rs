use hive_core::{ClusterEvent, Op};
use hive_db::{Database, DbResult};

use crate::TableRegistry;

/// Applies a batch of remote events with last-writer-wins conflict
/// resolution, and persists every event (applied or not) to `cluster_events`
/// so a causally "future" peer can still reconcile later.
///
/// Events are sorted by `(logical_ts, actor_id, actor_counter)` before
/// processing. Returns the number of events whose target row was actually
/// mutated.
pub fn apply_remote_events(
    db: &Database,
    registry: &TableRegistry,
    events: &[ClusterEvent],
) -> DbResult<usize> {
    let mut ordered: Vec<&ClusterEvent> = events.iter().collect();
    ordered.sort_by(|a, b| a.version.cmp(&b.version));

    let mut mutated = 0;
    for event in ordered {
        if apply_one(db, registry, event)? {
            mutated += 1;
        }
    }
    Ok(mutated)
}

fn apply_one(db: &Database, registry: &TableRegistry, event: &ClusterEvent) -> DbResult<bool> {
    if db.cluster_events_has(&event.event_id)? {
        return Ok(false);
    }

    let adapter = registry.get(&event.table_name);
    let current_version = db.row_version_get(&event.table_name, &event.row_id)?;
    let is_newer = current_version.as_ref().map_or(true, |v| event.version > *v);

    let mut mutated = false;
    if let Some(adapter) = adapter {
        if is_newer {
            match (event.op, &event.payload) {
                // A null-payload upsert is persisted but never applied: it
                // stands for an event the originator could not serialize.
                (Op::Upsert, Some(payload)) => {
                    db.with_connection(|conn| {
                        adapter
                            .upsert(conn, payload)
                            .map_err(|source| hive_db::DbError::Sqlite { source })
                    })?;
                    db.row_hash_set(&event.table_name, &event.row_id, &hive_core::hash_canonical(payload))?;
                    mutated = true;
                }
                (Op::Upsert, None) => {}
                (Op::Delete, _) => {
                    db.with_connection(|conn| {
                        adapter
                            .delete(conn, &event.row_id)
                            .map_err(|source| hive_db::DbError::Sqlite { source })
                    })?;
                    db.row_hash_clear(&event.table_name, &event.row_id)?;
                    mutated = true;
                }
            }
        }
    }

    db.cluster_events_insert(event)?;
    if is_newer {
        db.row_version_set(&event.table_name, &event.row_id, &event.version)?;
    }
    Ok(mutated)
}

#[cfg(test)]
mod tests {
    use hive_core::NodeId;
    use hive_db::Database;
    use serde_json::json;

    use super::*;
    use crate::tables::register_builtin_tables;

    fn registry() -> TableRegistry {
        let mut registry = TableRegistry::new();
        register_builtin_tables(&mut registry);
        registry
    }

    fn upsert_event(actor: &str, counter: u64, ts: i64, row_id: &str, title: &str) -> ClusterEvent {
        ClusterEvent::new_local(
            &NodeId::new(actor),
            counter,
            ts,
            "stories",
            row_id,
            Op::Upsert,
            Some(json!({"id": row_id, "title": title})),
        )
    }

    #[test]
    fn unknown_table_is_persisted_but_not_applied() {
        let db = Database::open_in_memory().unwrap();
        let registry = registry();
        let event = ClusterEvent::new_local(
            &NodeId::new("a"),
            1,
            1000,
            "unknown_table",
            "x",
            Op::Upsert,
            Some(json!({"id": "x"})),
        );
        let mutated = apply_remote_events(&db, &registry, &[event.clone()]).unwrap();
        assert_eq!(mutated, 0);
        assert!(db.cluster_events_has(&event.event_id).unwrap());
    }

    #[test]
    fn idempotent_replay_mutates_nothing_on_second_apply() {
        let db = Database::open_in_memory().unwrap();
        let registry = registry();
        let event = upsert_event("a", 1, 1000, "S-1", "Hello");
        assert_eq!(apply_remote_events(&db, &registry, &[event.clone()]).unwrap(), 1);
        assert_eq!(apply_remote_events(&db, &registry, &[event]).unwrap(), 0);
    }

    #[test]
    fn last_writer_wins_regardless_of_arrival_order() {
        let db = Database::open_in_memory().unwrap();
        let registry = registry();
        let earlier = upsert_event("a", 1, 1000, "S-1", "Old title");
        let later = upsert_event("a", 2, 2000, "S-1", "New title");

        // Apply the later event first, then the earlier one.
        apply_remote_events(&db, &registry, &[later.clone()]).unwrap();
        apply_remote_events(&db, &registry, &[earlier]).unwrap();

        let stories = registry.get("stories").unwrap();
        let rows = db
            .with_connection(|conn| {
                stories.select_all(conn).map_err(|source| hive_db::DbError::Sqlite { source })
            })
            .unwrap();
        assert_eq!(rows[0]["title"], "New title");
        assert_eq!(
            db.row_version_get("stories", "S-1").unwrap().unwrap(),
            later.version
        );
    }

    #[test]
    fn null_payload_upsert_is_persisted_but_does_not_touch_the_table() {
        let db = Database::open_in_memory().unwrap();
        let registry = registry();
        let event = ClusterEvent::new_local(
            &NodeId::new("a"),
            1,
            1000,
            "stories",
            "S-1",
            Op::Upsert,
            None,
        );
        let mutated = apply_remote_events(&db, &registry, &[event.clone()]).unwrap();
        assert_eq!(mutated, 0);
        assert!(db.cluster_events_has(&event.event_id).unwrap());
        let stories = registry.get("stories").unwrap();
        let rows = db
            .with_connection(|conn| {
                stories
                    .ensure_schema(conn)
                    .and_then(|()| stories.select_all(conn))
                    .map_err(|source| hive_db::DbError::Sqlite { source })
            })
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn lower_version_event_is_not_applied_but_still_stored() {
        let db = Database::open_in_memory().unwrap();
        let registry = registry();
        let newer = upsert_event("a", 5, 5000, "S-1", "Newer");
        apply_remote_events(&db, &registry, &[newer]).unwrap();

        let stale = upsert_event("a", 1, 1000, "S-1", "Stale");
        let mutated = apply_remote_events(&db, &registry, &[stale.clone()]).unwrap();
        assert_eq!(mutated, 0);
        assert!(db.cluster_events_has(&stale.event_id).unwrap());

        let stories = registry.get("stories").unwrap();
        let rows = db
            .with_connection(|conn| {
                stories.select_all(conn).map_err(|source| hive_db::DbError::Sqlite { source })
            })
            .unwrap();
        assert_eq!(rows[0]["title"], "Newer");
    }
}
