use hive_core::{CausalVersion, NodeId};

use crate::{Database, DbResult};

impl Database {
    /// Latest applied version for `(table_name, row_id)`, or `None` if no
    /// event has ever been applied there, backed by `cluster_row_versions`.
    pub fn row_version_get(&self, table_name: &str, row_id: &str) -> DbResult<Option<CausalVersion>> {
        self.query_one(
            "SELECT actor_id, actor_counter, logical_ts FROM cluster_row_versions \
             WHERE table_name = ?1 AND row_id = ?2",
            &[&table_name, &row_id],
            |row| {
                Ok(CausalVersion::new(
                    NodeId::new(row.get::<_, String>(0)?),
                    row.get::<_, i64>(1)? as u64,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
    }

    pub fn row_version_set(
        &self,
        table_name: &str,
        row_id: &str,
        version: &CausalVersion,
    ) -> DbResult<()> {
        self.run(
            "INSERT INTO cluster_row_versions (table_name, row_id, actor_id, actor_counter, logical_ts) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT (table_name, row_id) DO UPDATE SET \
                actor_id = excluded.actor_id, \
                actor_counter = excluded.actor_counter, \
                logical_ts = excluded.logical_ts",
            &[
                &table_name,
                &row_id,
                &version.actor_id.as_str(),
                &(version.actor_counter as i64),
                &version.logical_ts,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let version = CausalVersion::new(NodeId::new("a"), 3, 1000);
        db.row_version_set("stories", "S-1", &version).unwrap();
        let got = db.row_version_get("stories", "S-1").unwrap().unwrap();
        assert_eq!(got, version);

        let newer = CausalVersion::new(NodeId::new("a"), 4, 2000);
        db.row_version_set("stories", "S-1", &newer).unwrap();
        let got = db.row_version_get("stories", "S-1").unwrap().unwrap();
        assert_eq!(got, newer);
    }

    #[test]
    fn missing_row_is_none() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.row_version_get("stories", "nope").unwrap().is_none());
    }
}
