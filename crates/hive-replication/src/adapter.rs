use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::Connection;
use serde_json::Value;

/// What the replication subsystem needs from one replicated table: how to
/// enumerate its current rows, derive a stable id from a row's payload, and
/// apply an upsert/delete back onto it.
///
/// A payload's `row_id` must be derivable from the payload alone, and
/// `to_payload` must produce the same canonical shape `select_all` rows do,
/// since both a freshly scanned row and a remotely applied one are hashed
/// the same way.
pub trait TableAdapter: Send + Sync {
    fn table_name(&self) -> &'static str;

    /// Creates the table (and any indexes) if it does not already exist.
    /// Replicated tables come into existence lazily, on first use.
    fn ensure_schema(&self, conn: &Connection) -> rusqlite::Result<()>;

    /// All current rows as canonical payload objects, in a stable order.
    fn select_all(&self, conn: &Connection) -> rusqlite::Result<Vec<Value>>;

    /// Derives this row's `row_id` from its payload. `None` means the
    /// payload is missing a field the id depends on and should be skipped.
    fn row_id(&self, payload: &Value) -> Option<String>;

    /// Idempotently applies `payload` to the table.
    fn upsert(&self, conn: &Connection, payload: &Value) -> rusqlite::Result<()>;

    /// Removes the row (and, for tables with cascading references, any
    /// dependent rows in other replicated tables).
    fn delete(&self, conn: &Connection, row_id: &str) -> rusqlite::Result<()>;
}

/// Maps table name to its adapter. Unknown tables are not an error: events
/// for them are persisted in `cluster_events` but never applied.
#[derive(Clone, Default)]
pub struct TableRegistry {
    adapters: HashMap<&'static str, Arc<dyn TableAdapter>>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn TableAdapter>) -> &mut Self {
        self.adapters.insert(adapter.table_name(), adapter);
        self
    }

    pub fn get(&self, table_name: &str) -> Option<&Arc<dyn TableAdapter>> {
        self.adapters.get(table_name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.adapters.keys().copied()
    }

    pub fn ensure_all_schemas(&self, conn: &Connection) -> rusqlite::Result<()> {
        for adapter in self.adapters.values() {
            adapter.ensure_schema(conn)?;
        }
        Ok(())
    }
}
