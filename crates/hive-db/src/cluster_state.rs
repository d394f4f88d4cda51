use hive_core::NodeId;
use snafu::OptionExt as _;

use crate::{Database, DbResult, MissingClusterStateSnafu};

/// The `cluster_state` singleton row (`id = 1`): this node's id and its
/// per-actor monotonic event counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterState {
    pub node_id: NodeId,
    pub event_counter: u64,
}

impl Database {
    /// Reads the singleton row, creating it with `event_counter = 0` the
    /// first time a given `node_id` is seen.
    pub fn cluster_state_ensure(&self, node_id: &NodeId) -> DbResult<ClusterState> {
        self.run(
            "INSERT OR IGNORE INTO cluster_state (id, node_id, event_counter) VALUES (1, ?1, 0)",
            &[&node_id.as_str()],
        )?;
        self.cluster_state_get()?.context(MissingClusterStateSnafu)
    }

    pub fn cluster_state_get(&self) -> DbResult<Option<ClusterState>> {
        self.query_one(
            "SELECT node_id, event_counter FROM cluster_state WHERE id = 1",
            &[],
            |row| {
                Ok(ClusterState {
                    node_id: NodeId::new(row.get::<_, String>(0)?),
                    event_counter: row.get::<_, i64>(1)? as u64,
                })
            },
        )
    }

    /// Atomically increments `event_counter` and returns the new value.
    /// This is the `actor_counter++` in the local emit step.
    pub fn cluster_state_next_counter(&self) -> DbResult<u64> {
        self.transaction(|tx| {
            tx.execute(
                "UPDATE cluster_state SET event_counter = event_counter + 1 WHERE id = 1",
                [],
            )
            .map_err(|source| crate::DbError::Sqlite { source })?;
            let counter: i64 = tx
                .query_row(
                    "SELECT event_counter FROM cluster_state WHERE id = 1",
                    [],
                    |row| row.get(0),
                )
                .map_err(|source| crate::DbError::Sqlite { source })?;
            Ok(counter as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_is_idempotent_and_counter_advances() {
        let db = Database::open_in_memory().unwrap();
        let node_id = NodeId::new("node-a");
        let first = db.cluster_state_ensure(&node_id).unwrap();
        assert_eq!(first.event_counter, 0);

        // A second ensure() for a different id must not reset the counter.
        db.cluster_state_next_counter().unwrap();
        let again = db.cluster_state_ensure(&NodeId::new("node-b")).unwrap();
        assert_eq!(again.node_id, node_id);
        assert_eq!(again.event_counter, 1);

        let next = db.cluster_state_next_counter().unwrap();
        assert_eq!(next, 2);
    }
}
