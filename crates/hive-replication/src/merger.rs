use std::collections::{HashMap, HashSet};

use hive_db::{Database, DbResult, StoryMerge};
use rusqlite::params;

use crate::adapter::TableAdapter;

const STATUS_ORDER: &[&str] = &[
    "draft",
    "estimated",
    "planned",
    "in_progress",
    "review",
    "qa",
    "qa_failed",
    "pr_submitted",
    "merged",
];

fn status_rank(status: Option<&str>) -> i32 {
    status
        .and_then(|s| STATUS_ORDER.iter().position(|&candidate| candidate == s))
        .map(|i| i as i32)
        .unwrap_or(-1)
}

fn tokenize(title: &str, description: &str) -> HashSet<String> {
    let text = format!("{title} {description}").to_lowercase();
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() >= 3)
        .map(str::to_owned)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

/// Simple union-find keyed by story id, rooted at the lexically smallest
/// member of each group.
struct UnionFind {
    parent: HashMap<String, String>,
}

impl UnionFind {
    fn new(ids: impl Iterator<Item = String>) -> Self {
        Self {
            parent: ids.map(|id| (id.clone(), id)).collect(),
        }
    }

    fn find(&mut self, id: &str) -> String {
        let parent = self.parent.get(id).cloned().unwrap_or_else(|| id.to_owned());
        if parent == id {
            return parent;
        }
        let root = self.find(&parent);
        self.parent.insert(id.to_owned(), root.clone());
        root
    }

    fn union(&mut self, a: &str, b: &str) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return;
        }
        // Keep the lexically smallest id as the root.
        let (winner, loser) = if root_a < root_b { (root_a, root_b) } else { (root_b, root_a) };
        self.parent.insert(loser, winner);
    }

    fn groups(&mut self) -> HashMap<String, Vec<String>> {
        let ids: Vec<String> = self.parent.keys().cloned().collect();
        let mut groups: HashMap<String, Vec<String>> = HashMap::new();
        for id in ids {
            let root = self.find(&id);
            groups.entry(root).or_default().push(id);
        }
        for members in groups.values_mut() {
            members.sort();
        }
        groups
    }
}

#[derive(Clone)]
struct Story {
    id: String,
    title: String,
    description: String,
    acceptance_criteria: Option<String>,
    status: Option<String>,
    assigned_agent_id: Option<String>,
    branch_name: Option<String>,
    pr_url: Option<String>,
    complexity_score: Option<i64>,
    story_points: Option<i64>,
    team_id: Option<String>,
    requirement_id: Option<String>,
}

fn load_stories(conn: &rusqlite::Connection) -> rusqlite::Result<Vec<Story>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, description, acceptance_criteria, status, assigned_agent_id, \
         branch_name, pr_url, complexity_score, story_points, team_id, requirement_id \
         FROM stories ORDER BY id",
    )?;
    stmt.query_map([], |row| {
        Ok(Story {
            id: row.get(0)?,
            title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            description: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            acceptance_criteria: row.get(3)?,
            status: row.get(4)?,
            assigned_agent_id: row.get(5)?,
            branch_name: row.get(6)?,
            pr_url: row.get(7)?,
            complexity_score: row.get(8)?,
            story_points: row.get(9)?,
            team_id: row.get(10)?,
            requirement_id: row.get(11)?,
        })
    })?
    .collect()
}

fn longer_or_first(a: &str, b: &str) -> String {
    if b.len() > a.len() { b.to_owned() } else { a.to_owned() }
}

fn prefer_non_null(canonical: Option<String>, duplicate: Option<String>) -> Option<String> {
    canonical.or(duplicate)
}

fn max_with_neg_infinity(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (Some(x), Some(y)) => Some(x.max(y)),
    }
}

/// Folds `duplicate`'s fields into `canonical` per the merge rules, returning
/// the merged story.
fn fold(canonical: &Story, duplicate: &Story) -> Story {
    let canonical_status_wins = status_rank(canonical.status.as_deref()) >= status_rank(duplicate.status.as_deref());
    Story {
        id: canonical.id.clone(),
        title: longer_or_first(&canonical.title, &duplicate.title),
        description: longer_or_first(&canonical.description, &duplicate.description),
        acceptance_criteria: prefer_non_null(
            canonical.acceptance_criteria.clone(),
            duplicate.acceptance_criteria.clone(),
        ),
        assigned_agent_id: prefer_non_null(
            canonical.assigned_agent_id.clone(),
            duplicate.assigned_agent_id.clone(),
        ),
        branch_name: prefer_non_null(canonical.branch_name.clone(), duplicate.branch_name.clone()),
        pr_url: prefer_non_null(canonical.pr_url.clone(), duplicate.pr_url.clone()),
        complexity_score: max_with_neg_infinity(canonical.complexity_score, duplicate.complexity_score),
        story_points: max_with_neg_infinity(canonical.story_points, duplicate.story_points),
        status: if canonical_status_wins {
            canonical.status.clone()
        } else {
            duplicate.status.clone()
        },
        team_id: canonical.team_id.clone(),
        requirement_id: canonical.requirement_id.clone(),
    }
}

fn write_story(conn: &rusqlite::Connection, story: &Story) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE stories SET title = ?2, description = ?3, acceptance_criteria = ?4, \
         status = ?5, assigned_agent_id = ?6, branch_name = ?7, pr_url = ?8, \
         complexity_score = ?9, story_points = ?10 WHERE id = ?1",
        params![
            story.id,
            story.title,
            story.description,
            story.acceptance_criteria,
            story.status,
            story.assigned_agent_id,
            story.branch_name,
            story.pr_url,
            story.complexity_score,
            story.story_points,
        ],
    )?;
    Ok(())
}

/// Rebinds every foreign reference from `duplicate_id` to `canonical_id`,
/// folds the duplicate's dependency edges onto the canonical story, then
/// removes the duplicate row and its now-redundant edges.
fn rebind_and_delete_duplicate(
    conn: &rusqlite::Connection,
    canonical_id: &str,
    duplicate_id: &str,
) -> rusqlite::Result<()> {
    for (table, column) in [
        ("pull_requests", "story_id"),
        ("escalations", "story_id"),
        ("logs", "story_id"),
    ] {
        conn.execute(
            &format!("UPDATE {table} SET {column} = ?1 WHERE {column} = ?2"),
            params![canonical_id, duplicate_id],
        )?;
    }
    conn.execute(
        "UPDATE agents SET current_story_id = ?1 WHERE current_story_id = ?2",
        params![canonical_id, duplicate_id],
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO story_dependencies (story_id, depends_on_story_id) \
         SELECT ?1, depends_on_story_id FROM story_dependencies WHERE story_id = ?2",
        params![canonical_id, duplicate_id],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO story_dependencies (story_id, depends_on_story_id) \
         SELECT story_id, ?1 FROM story_dependencies WHERE depends_on_story_id = ?2",
        params![canonical_id, duplicate_id],
    )?;
    conn.execute(
        "DELETE FROM story_dependencies WHERE story_id = depends_on_story_id",
        [],
    )?;
    conn.execute(
        "DELETE FROM story_dependencies WHERE story_id = ?1 OR depends_on_story_id = ?1",
        params![duplicate_id],
    )?;
    conn.execute("DELETE FROM stories WHERE id = ?1", params![duplicate_id])?;
    Ok(())
}

/// Groups near-duplicate stories by title/description similarity and a
/// shared `(team_id, requirement_id)`, folds each group into its canonical
/// (lexically smallest id) row, and records the merge. Returns the number
/// of duplicates merged.
pub fn run_story_merger(db: &Database, similarity_threshold: f64) -> DbResult<usize> {
    let stories = db.with_connection(|conn| {
        (|| -> rusqlite::Result<Vec<Story>> {
            crate::tables::StoriesAdapter.ensure_schema(conn)?;
            crate::tables::StoryDependenciesAdapter.ensure_schema(conn)?;
            crate::tables::PullRequestsAdapter.ensure_schema(conn)?;
            crate::tables::EscalationsAdapter.ensure_schema(conn)?;
            crate::tables::AgentsAdapter.ensure_schema(conn)?;
            crate::tables::LogsAdapter.ensure_schema(conn)?;
            load_stories(conn)
        })()
        .map_err(|source| hive_db::DbError::Sqlite { source })
    })?;
    if stories.len() < 2 {
        return Ok(0);
    }

    let tokens: HashMap<String, HashSet<String>> = stories
        .iter()
        .map(|s| (s.id.clone(), tokenize(&s.title, &s.description)))
        .collect();
    let by_id: HashMap<String, &Story> = stories.iter().map(|s| (s.id.clone(), s)).collect();

    let mut union_find = UnionFind::new(stories.iter().map(|s| s.id.clone()));
    for i in 0..stories.len() {
        for j in (i + 1)..stories.len() {
            let a = &stories[i];
            let b = &stories[j];
            if a.team_id != b.team_id || a.requirement_id != b.requirement_id {
                continue;
            }
            let similarity = jaccard(&tokens[&a.id], &tokens[&b.id]);
            if similarity >= similarity_threshold {
                union_find.union(&a.id, &b.id);
            }
        }
    }

    let mut merged_count = 0;
    for (root, members) in union_find.groups() {
        if members.len() < 2 {
            continue;
        }
        let canonical_id = root;
        for duplicate_id in members.iter().filter(|id| **id != canonical_id) {
            if db.story_merge_is_recorded(duplicate_id)? {
                continue;
            }
            let (Some(&canonical), Some(&duplicate)) =
                (by_id.get(&canonical_id), by_id.get(duplicate_id))
            else {
                continue;
            };
            let merged = fold(canonical, duplicate);
            db.with_connection(|conn| {
                write_story(conn, &merged)
                    .and_then(|()| rebind_and_delete_duplicate(conn, &canonical_id, duplicate_id))
                    .map_err(|source| hive_db::DbError::Sqlite { source })
            })?;
            db.row_hash_clear("stories", duplicate_id)?;
            db.story_merge_record(&StoryMerge {
                duplicate_id: duplicate_id.clone(),
                canonical_id: canonical_id.clone(),
                merged_at: hive_core::now_ms(),
            })?;
            merged_count += 1;
        }
    }
    Ok(merged_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::register_builtin_tables;
    use crate::TableRegistry;
    use serde_json::json;

    const SHARED_DESCRIPTION: &str = "Allow users to sign in securely using an external \
        identity provider and store the resulting session token for api access across devices";

    fn seeded_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        let mut registry = TableRegistry::new();
        register_builtin_tables(&mut registry);
        let stories = registry.get("stories").unwrap();
        db.with_connection(|conn| {
            registry.ensure_all_schemas(conn).map_err(|source| hive_db::DbError::Sqlite { source })?;
            stories
                .upsert(
                    conn,
                    &json!({
                        "id": "S-100", "team_id": "T-1", "requirement_id": "R-1",
                        "title": "Implement OAuth Login", "description": SHARED_DESCRIPTION,
                        "status": "planned", "complexity_score": 3, "story_points": 2,
                    }),
                )
                .and_then(|_| {
                    stories.upsert(
                        conn,
                        &json!({
                            "id": "S-200", "team_id": "T-1", "requirement_id": "R-1",
                            "title": "Implement OAuth Login With PKCE Flow",
                            "description": SHARED_DESCRIPTION,
                            "status": "review", "complexity_score": 8, "story_points": 5,
                        }),
                    )
                })
                .map_err(|source| hive_db::DbError::Sqlite { source })
        })
        .unwrap();
        db
    }

    #[test]
    fn duplicate_stories_are_merged_into_the_smaller_id() {
        let db = seeded_db();
        let merged = run_story_merger(&db, 0.8).unwrap();
        assert_eq!(merged, 1);

        let remaining = db
            .with_connection(|conn| {
                load_stories(conn).map_err(|source| hive_db::DbError::Sqlite { source })
            })
            .unwrap();
        assert_eq!(remaining.len(), 1);
        let survivor = &remaining[0];
        assert_eq!(survivor.id, "S-100");
        assert_eq!(survivor.status.as_deref(), Some("review"));
        assert_eq!(survivor.complexity_score, Some(8));
        assert_eq!(survivor.story_points, Some(5));
        assert!(survivor.title.contains("PKCE"));

        assert!(db.story_merge_is_recorded("S-200").unwrap());
    }

    #[test]
    fn merger_is_idempotent() {
        let db = seeded_db();
        run_story_merger(&db, 0.8).unwrap();
        let second_pass = run_story_merger(&db, 0.8).unwrap();
        assert_eq!(second_pass, 0);
    }

    #[test]
    fn dissimilar_stories_are_not_merged() {
        let db = Database::open_in_memory().unwrap();
        let mut registry = TableRegistry::new();
        register_builtin_tables(&mut registry);
        let stories = registry.get("stories").unwrap();
        db.with_connection(|conn| {
            registry.ensure_all_schemas(conn).map_err(|source| hive_db::DbError::Sqlite { source })?;
            stories
                .upsert(conn, &json!({"id": "S-1", "team_id": "T-1", "title": "Fix login bug"}))
                .and_then(|_| {
                    stories.upsert(conn, &json!({"id": "S-2", "team_id": "T-1", "title": "Rewrite billing export"}))
                })
                .map_err(|source| hive_db::DbError::Sqlite { source })
        })
        .unwrap();
        assert_eq!(run_story_merger(&db, 0.8).unwrap(), 0);
    }

    #[test]
    fn jaccard_of_identical_sets_is_one() {
        let a: HashSet<String> = ["one".into(), "two".into()].into_iter().collect();
        assert_eq!(jaccard(&a, &a), 1.0);
    }
}
