use crate::{Database, DbResult};

/// A recorded `duplicate_id -> canonical_id` story merge, backed by the
/// `cluster_story_merges` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryMerge {
    pub duplicate_id: String,
    pub canonical_id: String,
    pub merged_at: i64,
}

impl Database {
    pub fn story_merge_is_recorded(&self, duplicate_id: &str) -> DbResult<bool> {
        Ok(self
            .query_one(
                "SELECT 1 FROM cluster_story_merges WHERE duplicate_id = ?1",
                &[&duplicate_id],
                |_| Ok(()),
            )?
            .is_some())
    }

    pub fn story_merge_record(&self, merge: &StoryMerge) -> DbResult<()> {
        self.run(
            "INSERT OR IGNORE INTO cluster_story_merges (duplicate_id, canonical_id, merged_at) \
             VALUES (?1, ?2, ?3)",
            &[&merge.duplicate_id, &merge.canonical_id, &merge.merged_at],
        )?;
        Ok(())
    }
}
