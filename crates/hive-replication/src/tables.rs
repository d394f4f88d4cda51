use rusqlite::{Connection, params};
use serde_json::{Value, json};

use crate::adapter::TableAdapter;

fn str_field(payload: &Value, key: &str) -> Option<String> {
    payload.get(key)?.as_str().map(str::to_owned)
}

macro_rules! simple_table_adapter {
    ($struct_name:ident, $table:literal, $ddl:literal, $columns:expr) => {
        pub struct $struct_name;

        impl TableAdapter for $struct_name {
            fn table_name(&self) -> &'static str {
                $table
            }

            fn ensure_schema(&self, conn: &Connection) -> rusqlite::Result<()> {
                conn.execute_batch($ddl)
            }

            fn select_all(&self, conn: &Connection) -> rusqlite::Result<Vec<Value>> {
                let sql = format!("SELECT {} FROM {} ORDER BY id", $columns.join(", "), $table);
                let mut stmt = conn.prepare(&sql)?;
                let columns = $columns;
                stmt.query_map([], |row| row_to_json(row, &columns))?.collect()
            }

            fn row_id(&self, payload: &Value) -> Option<String> {
                str_field(payload, "id")
            }

            fn upsert(&self, conn: &Connection, payload: &Value) -> rusqlite::Result<()> {
                upsert_by_columns(conn, $table, &$columns, payload)
            }

            fn delete(&self, conn: &Connection, row_id: &str) -> rusqlite::Result<()> {
                conn.execute(
                    concat!("DELETE FROM ", $table, " WHERE id = ?1"),
                    params![row_id],
                )
                .map(|_| ())
            }
        }
    };
}

/// Pulls the given columns out of a row into a JSON object, typing `*_at`
/// and `*_score`/`*_points` columns as numbers and everything else as text
/// (NULL stays absent from the object so canonicalization is stable).
fn row_to_json(row: &rusqlite::Row<'_>, columns: &[&str]) -> rusqlite::Result<Value> {
    let mut object = serde_json::Map::new();
    for (i, &col) in columns.iter().enumerate() {
        let value: rusqlite::types::Value = row.get(i)?;
        let json_value = match value {
            rusqlite::types::Value::Null => continue,
            rusqlite::types::Value::Integer(n) => json!(n),
            rusqlite::types::Value::Real(f) => json!(f),
            rusqlite::types::Value::Text(s) => json!(s),
            rusqlite::types::Value::Blob(_) => continue,
        };
        object.insert(col.to_string(), json_value);
    }
    Ok(Value::Object(object))
}

fn upsert_by_columns(
    conn: &Connection,
    table: &str,
    columns: &[&str],
    payload: &Value,
) -> rusqlite::Result<()> {
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let assignments: Vec<String> = columns
        .iter()
        .filter(|&&c| c != "id")
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();
    let sql = format!(
        "INSERT INTO {table} ({cols}) VALUES ({vals}) \
         ON CONFLICT (id) DO UPDATE SET {assignments}",
        cols = columns.join(", "),
        vals = placeholders.join(", "),
        assignments = assignments.join(", "),
    );
    let values: Vec<rusqlite::types::Value> = columns
        .iter()
        .map(|&c| payload_to_sql_value(payload, c))
        .collect();
    let param_refs: Vec<&dyn rusqlite::types::ToSql> =
        values.iter().map(|v| v as &dyn rusqlite::types::ToSql).collect();
    conn.execute(&sql, param_refs.as_slice()).map(|_| ())
}

fn payload_to_sql_value(payload: &Value, key: &str) -> rusqlite::types::Value {
    match payload.get(key) {
        None | Some(Value::Null) => rusqlite::types::Value::Null,
        Some(Value::String(s)) => rusqlite::types::Value::Text(s.clone()),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(rusqlite::types::Value::Integer)
            .or_else(|| n.as_f64().map(rusqlite::types::Value::Real))
            .unwrap_or(rusqlite::types::Value::Null),
        Some(other) => rusqlite::types::Value::Text(other.to_string()),
    }
}

simple_table_adapter!(
    TeamsAdapter,
    "teams",
    "CREATE TABLE IF NOT EXISTS teams (id TEXT PRIMARY KEY, name TEXT, created_at INTEGER)",
    ["id", "name", "created_at"]
);

simple_table_adapter!(
    AgentsAdapter,
    "agents",
    "CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        team_id TEXT,
        name TEXT,
        status TEXT,
        current_story_id TEXT,
        created_at INTEGER
    )",
    ["id", "team_id", "name", "status", "current_story_id", "created_at"]
);

simple_table_adapter!(
    RequirementsAdapter,
    "requirements",
    "CREATE TABLE IF NOT EXISTS requirements (
        id TEXT PRIMARY KEY,
        team_id TEXT,
        title TEXT,
        description TEXT,
        created_at INTEGER
    )",
    ["id", "team_id", "title", "description", "created_at"]
);

pub struct StoriesAdapter;

const STORY_COLUMNS: &[&str] = &[
    "id",
    "team_id",
    "requirement_id",
    "title",
    "description",
    "acceptance_criteria",
    "status",
    "assigned_agent_id",
    "branch_name",
    "pr_url",
    "complexity_score",
    "story_points",
    "created_at",
];

impl TableAdapter for StoriesAdapter {
    fn table_name(&self) -> &'static str {
        "stories"
    }

    fn ensure_schema(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS stories (
                id TEXT PRIMARY KEY,
                team_id TEXT,
                requirement_id TEXT,
                title TEXT,
                description TEXT,
                acceptance_criteria TEXT,
                status TEXT,
                assigned_agent_id TEXT,
                branch_name TEXT,
                pr_url TEXT,
                complexity_score INTEGER,
                story_points INTEGER,
                created_at INTEGER
            )",
        )
    }

    fn select_all(&self, conn: &Connection) -> rusqlite::Result<Vec<Value>> {
        let sql = format!("SELECT {} FROM stories ORDER BY id", STORY_COLUMNS.join(", "));
        let mut stmt = conn.prepare(&sql)?;
        stmt.query_map([], |row| row_to_json(row, STORY_COLUMNS))?.collect()
    }

    fn row_id(&self, payload: &Value) -> Option<String> {
        str_field(payload, "id")
    }

    fn upsert(&self, conn: &Connection, payload: &Value) -> rusqlite::Result<()> {
        upsert_by_columns(conn, "stories", STORY_COLUMNS, payload)
    }

    /// Deleting a story also clears its dependency edges in either
    /// direction, since `story_dependencies` rows reference it.
    fn delete(&self, conn: &Connection, row_id: &str) -> rusqlite::Result<()> {
        conn.execute("DELETE FROM stories WHERE id = ?1", params![row_id])?;
        conn.execute(
            "DELETE FROM story_dependencies WHERE story_id = ?1 OR depends_on_story_id = ?1",
            params![row_id],
        )?;
        Ok(())
    }
}

pub struct StoryDependenciesAdapter;

impl TableAdapter for StoryDependenciesAdapter {
    fn table_name(&self) -> &'static str {
        "story_dependencies"
    }

    fn ensure_schema(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS story_dependencies (
                story_id TEXT NOT NULL,
                depends_on_story_id TEXT NOT NULL,
                PRIMARY KEY (story_id, depends_on_story_id)
            )",
        )
    }

    fn select_all(&self, conn: &Connection) -> rusqlite::Result<Vec<Value>> {
        let mut stmt = conn.prepare(
            "SELECT story_id, depends_on_story_id FROM story_dependencies \
             ORDER BY story_id, depends_on_story_id",
        )?;
        stmt.query_map([], |row| {
            Ok(json!({
                "story_id": row.get::<_, String>(0)?,
                "depends_on_story_id": row.get::<_, String>(1)?,
            }))
        })?
        .collect()
    }

    /// Composite row id `"{from}::{to}"` for this join table.
    fn row_id(&self, payload: &Value) -> Option<String> {
        let from = str_field(payload, "story_id")?;
        let to = str_field(payload, "depends_on_story_id")?;
        Some(format!("{from}::{to}"))
    }

    fn upsert(&self, conn: &Connection, payload: &Value) -> rusqlite::Result<()> {
        let from = str_field(payload, "story_id").unwrap_or_default();
        let to = str_field(payload, "depends_on_story_id").unwrap_or_default();
        conn.execute(
            "INSERT OR IGNORE INTO story_dependencies (story_id, depends_on_story_id) \
             VALUES (?1, ?2)",
            params![from, to],
        )
        .map(|_| ())
    }

    /// `row_id` here is the composite `"{from}::{to}"` key; parse it back.
    fn delete(&self, conn: &Connection, row_id: &str) -> rusqlite::Result<()> {
        if let Some((from, to)) = row_id.split_once("::") {
            conn.execute(
                "DELETE FROM story_dependencies WHERE story_id = ?1 AND depends_on_story_id = ?2",
                params![from, to],
            )?;
        }
        Ok(())
    }
}

pub struct LogsAdapter;

const LOG_COLUMNS: &[&str] = &["agent_id", "story_id", "level", "message", "created_at"];

impl TableAdapter for LogsAdapter {
    fn table_name(&self) -> &'static str {
        "logs"
    }

    fn ensure_schema(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS logs (
                agent_id TEXT,
                story_id TEXT,
                level TEXT,
                message TEXT,
                created_at INTEGER
            )",
        )
    }

    fn select_all(&self, conn: &Connection) -> rusqlite::Result<Vec<Value>> {
        let mut stmt = conn.prepare(
            "SELECT agent_id, story_id, level, message, created_at FROM logs ORDER BY rowid",
        )?;
        stmt.query_map([], |row| row_to_json(row, LOG_COLUMNS))?.collect()
    }

    /// Logs have no natural key; the canonical payload hash stands in for
    /// `row_id` for this append-only table.
    fn row_id(&self, payload: &Value) -> Option<String> {
        Some(hive_core::hash_canonical(payload))
    }

    /// Appends the row only if no existing row hashes to the same id, so a
    /// replayed event does not duplicate the log line.
    fn upsert(&self, conn: &Connection, payload: &Value) -> rusqlite::Result<()> {
        if find_log_rowid(conn, &hive_core::hash_canonical(payload))?.is_some() {
            return Ok(());
        }
        conn.execute(
            "INSERT INTO logs (agent_id, story_id, level, message, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                payload.get("agent_id").and_then(Value::as_str),
                payload.get("story_id").and_then(Value::as_str),
                payload.get("level").and_then(Value::as_str),
                payload.get("message").and_then(Value::as_str),
                payload.get("created_at").and_then(Value::as_i64),
            ],
        )
        .map(|_| ())
    }

    fn delete(&self, conn: &Connection, row_id: &str) -> rusqlite::Result<()> {
        if let Some(rowid) = find_log_rowid(conn, row_id)? {
            conn.execute("DELETE FROM logs WHERE rowid = ?1", params![rowid])?;
        }
        Ok(())
    }
}

/// Scans every log row to find the one whose payload hashes to `target`.
/// This is the expensive, scan-and-match delete a content-hash row id
/// incurs; logs are append-heavy and rarely deleted individually.
fn find_log_rowid(conn: &Connection, target: &str) -> rusqlite::Result<Option<i64>> {
    let mut stmt = conn
        .prepare("SELECT rowid, agent_id, story_id, level, message, created_at FROM logs")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let rowid: i64 = row.get(0)?;
        let mut object = serde_json::Map::new();
        for (offset, &col) in LOG_COLUMNS.iter().enumerate() {
            let value: rusqlite::types::Value = row.get(offset + 1)?;
            let json_value = match value {
                rusqlite::types::Value::Null => continue,
                rusqlite::types::Value::Integer(n) => json!(n),
                rusqlite::types::Value::Real(f) => json!(f),
                rusqlite::types::Value::Text(s) => json!(s),
                rusqlite::types::Value::Blob(_) => continue,
            };
            object.insert(col.to_string(), json_value);
        }
        if hive_core::hash_canonical(&Value::Object(object)) == target {
            return Ok(Some(rowid));
        }
    }
    Ok(None)
}

simple_table_adapter!(
    EscalationsAdapter,
    "escalations",
    "CREATE TABLE IF NOT EXISTS escalations (
        id TEXT PRIMARY KEY,
        story_id TEXT,
        agent_id TEXT,
        reason TEXT,
        status TEXT,
        created_at INTEGER
    )",
    ["id", "story_id", "agent_id", "reason", "status", "created_at"]
);

simple_table_adapter!(
    PullRequestsAdapter,
    "pull_requests",
    "CREATE TABLE IF NOT EXISTS pull_requests (
        id TEXT PRIMARY KEY,
        story_id TEXT,
        url TEXT,
        status TEXT,
        created_at INTEGER
    )",
    ["id", "story_id", "url", "status", "created_at"]
);

simple_table_adapter!(
    MessagesAdapter,
    "messages",
    "CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        from_agent_id TEXT,
        to_agent_id TEXT,
        body TEXT,
        created_at INTEGER
    )",
    ["id", "from_agent_id", "to_agent_id", "body", "created_at"]
);

/// Registers every built-in replicated table.
pub fn register_builtin_tables(registry: &mut crate::TableRegistry) {
    registry
        .register(std::sync::Arc::new(TeamsAdapter))
        .register(std::sync::Arc::new(AgentsAdapter))
        .register(std::sync::Arc::new(RequirementsAdapter))
        .register(std::sync::Arc::new(StoriesAdapter))
        .register(std::sync::Arc::new(StoryDependenciesAdapter))
        .register(std::sync::Arc::new(LogsAdapter))
        .register(std::sync::Arc::new(EscalationsAdapter))
        .register(std::sync::Arc::new(PullRequestsAdapter))
        .register(std::sync::Arc::new(MessagesAdapter));
}
