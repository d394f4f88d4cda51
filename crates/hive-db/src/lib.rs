//! The embedded SQL store the coordination core runs against.
//!
//! `Database` is a thin synchronous wrapper around a single
//! [`rusqlite::Connection`] guarded by a mutex, exposing a narrow
//! `run`/`query_one`/`query_all` surface as the database contract.
//! Everything funnels through one connection so the "compare row_version
//! -> mutate table -> update bookkeeping" sequence can be wrapped in a
//! single SQLite transaction by callers.
//!
//! This crate also owns the five bookkeeping tables (`cluster_state`,
//! `cluster_events`, `cluster_row_versions`, `cluster_row_hashes`,
//! `cluster_story_merges`); the replicated business tables themselves
//! belong to the adapters defined in `hive-replication`.

mod cluster_state;
mod events;
mod row_hashes;
mod row_versions;
mod story_merges;

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, Row};
use rusqlite::types::ToSql;
use snafu::{ResultExt, Snafu};

pub use cluster_state::ClusterState;
pub use events::StoredEvent;
pub use story_merges::StoryMerge;

const LOG_TARGET: &str = "hive::db";

#[derive(Debug, Snafu)]
pub enum DbError {
    #[snafu(display("sqlite error: {source}"))]
    Sqlite { source: rusqlite::Error },
    #[snafu(display("cluster_state row is missing or malformed"))]
    MissingClusterState,
}

pub type DbResult<T> = std::result::Result<T, DbError>;

/// A handle to the embedded SQL store. Cheap to clone; clones share the
/// same connection and the same serializing mutex.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let conn = Connection::open(path).context(SqliteSnafu)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_with_flags(
            "file::memory:",
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )
        .context(SqliteSnafu)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> DbResult<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .context(SqliteSnafu)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .context(SqliteSnafu)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_bookkeeping_tables()?;
        tracing::debug!(target: LOG_TARGET, "opened database");
        Ok(db)
    }

    /// Runs a statement that does not return rows (`INSERT`/`UPDATE`/
    /// `DELETE`/DDL), returning the number of rows changed.
    pub fn run(&self, sql: &str, params: &[&dyn ToSql]) -> DbResult<usize> {
        self.conn
            .lock()
            .execute(sql, params)
            .context(SqliteSnafu)
    }

    /// Runs a query expected to return at most one row.
    pub fn query_one<T>(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
        row_fn: impl FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    ) -> DbResult<Option<T>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql).context(SqliteSnafu)?;
        let mut rows = stmt.query(params).context(SqliteSnafu)?;
        match rows.next().context(SqliteSnafu)? {
            Some(row) => Ok(Some(row_fn(row).context(SqliteSnafu)?)),
            None => Ok(None),
        }
    }

    /// Runs a query, collecting every returned row.
    pub fn query_all<T>(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
        mut row_fn: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> DbResult<Vec<T>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql).context(SqliteSnafu)?;
        let mut rows = stmt.query(params).context(SqliteSnafu)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().context(SqliteSnafu)? {
            out.push(row_fn(row).context(SqliteSnafu)?);
        }
        Ok(out)
    }

    /// Gives direct access to the underlying connection for callers (table
    /// adapters) that need to run several statements of their own choosing
    /// without paying for a transaction, e.g. a read-only bulk scan.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> DbResult<T>) -> DbResult<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Runs `body` inside a single SQLite transaction, rolling back on
    /// error. Used by replication/merger operations that must make several
    /// bookkeeping updates atomically.
    pub fn transaction<T>(
        &self,
        body: impl FnOnce(&rusqlite::Transaction<'_>) -> DbResult<T>,
    ) -> DbResult<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context(SqliteSnafu)?;
        let result = body(&tx)?;
        tx.commit().context(SqliteSnafu)?;
        Ok(result)
    }

    fn init_bookkeeping_tables(&self) -> DbResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cluster_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                node_id TEXT NOT NULL,
                event_counter INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cluster_events (
                event_id TEXT PRIMARY KEY,
                table_name TEXT NOT NULL,
                row_id TEXT NOT NULL,
                op TEXT NOT NULL,
                payload TEXT,
                actor_id TEXT NOT NULL,
                actor_counter INTEGER NOT NULL,
                logical_ts INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (actor_id, actor_counter)
            );
            CREATE INDEX IF NOT EXISTS cluster_events_by_time
                ON cluster_events (logical_ts, actor_id, actor_counter);

            CREATE TABLE IF NOT EXISTS cluster_row_versions (
                table_name TEXT NOT NULL,
                row_id TEXT NOT NULL,
                actor_id TEXT NOT NULL,
                actor_counter INTEGER NOT NULL,
                logical_ts INTEGER NOT NULL,
                PRIMARY KEY (table_name, row_id)
            );

            CREATE TABLE IF NOT EXISTS cluster_row_hashes (
                table_name TEXT NOT NULL,
                row_id TEXT NOT NULL,
                row_hash TEXT NOT NULL,
                PRIMARY KEY (table_name, row_id)
            );

            CREATE TABLE IF NOT EXISTS cluster_story_merges (
                duplicate_id TEXT PRIMARY KEY,
                canonical_id TEXT NOT NULL,
                merged_at INTEGER NOT NULL
            );",
        )
        .context(SqliteSnafu)
    }
}
