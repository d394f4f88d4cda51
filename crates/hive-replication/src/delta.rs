use hive_core::{ClusterEvent, VersionVector};
use hive_db::{Database, DbResult};

/// The default cap a server handler applies when a caller omits `limit`.
pub const DEFAULT_DELTA_LIMIT: usize = 2000;

pub struct Delta {
    pub events: Vec<ClusterEvent>,
    pub version_vector: VersionVector,
}

/// Enumerates events in logical-time order and returns the prefix (up to
/// `limit`) whose `actor_counter` exceeds what `remote_vector` already
/// knows for that actor, alongside this node's full version vector so the
/// caller can advance its knowledge in one round trip.
pub fn get_delta_events(
    db: &Database,
    remote_vector: &VersionVector,
    limit: usize,
) -> DbResult<Delta> {
    let all = db.cluster_events_all_ordered()?;
    let events = all
        .into_iter()
        .filter(|event| event.version.actor_counter > remote_vector.get(event.version.actor_id.as_str()))
        .take(limit)
        .collect();
    let version_vector = db.cluster_events_version_vector()?;
    Ok(Delta { events, version_vector })
}
