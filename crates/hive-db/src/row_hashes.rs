use std::collections::HashMap;

use crate::{Database, DbResult};

impl Database {
    /// `{row_id -> row_hash}` snapshot for a whole table, the input to
    /// `scan_local_changes`'s change detection.
    pub fn row_hashes_for_table(&self, table_name: &str) -> DbResult<HashMap<String, String>> {
        let rows: Vec<(String, String)> = self.query_all(
            "SELECT row_id, row_hash FROM cluster_row_hashes WHERE table_name = ?1",
            &[&table_name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(rows.into_iter().collect())
    }

    pub fn row_hash_set(&self, table_name: &str, row_id: &str, hash: &str) -> DbResult<()> {
        self.run(
            "INSERT INTO cluster_row_hashes (table_name, row_id, row_hash) VALUES (?1, ?2, ?3) \
             ON CONFLICT (table_name, row_id) DO UPDATE SET row_hash = excluded.row_hash",
            &[&table_name, &row_id, &hash],
        )?;
        Ok(())
    }

    /// Clears the stored hash for a deleted row, so a row recreated with the
    /// same id is not mistaken for an unchanged one on the next scan.
    pub fn row_hash_clear(&self, table_name: &str, row_id: &str) -> DbResult<()> {
        self.run(
            "DELETE FROM cluster_row_hashes WHERE table_name = ?1 AND row_id = ?2",
            &[&table_name, &row_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_list_and_clear() {
        let db = Database::open_in_memory().unwrap();
        db.row_hash_set("stories", "S-1", "h1").unwrap();
        db.row_hash_set("stories", "S-2", "h2").unwrap();

        let snapshot = db.row_hashes_for_table("stories").unwrap();
        assert_eq!(snapshot.get("S-1").unwrap(), "h1");
        assert_eq!(snapshot.len(), 2);

        db.row_hash_clear("stories", "S-1").unwrap();
        let snapshot = db.row_hashes_for_table("stories").unwrap();
        assert!(!snapshot.contains_key("S-1"));
        assert_eq!(snapshot.len(), 1);
    }
}
