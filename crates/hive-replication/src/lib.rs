//! The replication data model: table adapters, local change detection,
//! remote event application, delta selection, and the story-deduplication
//! merger built on top of them.

mod adapter;
mod apply;
mod delta;
mod merger;
mod scan;
mod tables;

pub use adapter::{TableAdapter, TableRegistry};
pub use apply::apply_remote_events;
pub use delta::{get_delta_events, Delta, DEFAULT_DELTA_LIMIT};
pub use merger::run_story_merger;
pub use scan::scan_local_changes;
pub use tables::register_builtin_tables;

/// Builds a registry with every built-in replicated table adapter
/// registered (teams, agents, requirements, stories, story_dependencies,
/// logs, escalations, pull_requests, messages).
pub fn builtin_registry() -> TableRegistry {
    let mut registry = TableRegistry::new();
    register_builtin_tables(&mut registry);
    registry
}
