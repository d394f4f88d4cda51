use hive_core::{ClusterEvent, VersionVector};
use parking_lot::RwLock;
use std::sync::Arc;

const LOG_TARGET: &str = "hive::server";

struct Inner {
    events: Vec<ClusterEvent>,
    version_vector: VersionVector,
}

/// The in-process cache `/cluster/v1/events/delta` serves from, so read
/// endpoints never contend with the single-writer database. Refreshed once
/// per sync cycle with the last ~20 000 events and the current version
/// vector.
#[derive(Clone)]
pub struct DeltaCache {
    inner: Arc<RwLock<Inner>>,
}

impl Default for DeltaCache {
    fn default() -> Self {
        Self { inner: Arc::new(RwLock::new(Inner { events: Vec::new(), version_vector: VersionVector::new() })) }
    }
}

impl DeltaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh(&self, events: Vec<ClusterEvent>, version_vector: VersionVector) {
        let mut inner = self.inner.write();
        tracing::debug!(target: LOG_TARGET, cached_events = events.len(), "refreshed delta cache");
        inner.events = events;
        inner.version_vector = version_vector;
    }

    pub fn version_vector(&self) -> VersionVector {
        self.inner.read().version_vector.clone()
    }

    /// Events from the cache whose `actor_counter` exceeds what
    /// `remote_vector` already knows, capped at `limit`.
    pub fn delta_since(&self, remote_vector: &VersionVector, limit: usize) -> (Vec<ClusterEvent>, VersionVector) {
        let inner = self.inner.read();
        let events = inner
            .events
            .iter()
            .filter(|event| event.version.actor_counter > remote_vector.get(event.version.actor_id.as_str()))
            .take(limit)
            .cloned()
            .collect();
        (events, inner.version_vector.clone())
    }
}

#[cfg(test)]
mod tests {
    use hive_core::{NodeId, Op};

    use super::*;

    fn event(actor: &str, counter: u64) -> ClusterEvent {
        ClusterEvent::new_local(&NodeId::new(actor), counter, 1000, "stories", "S-1", Op::Upsert, None)
    }

    #[test]
    fn delta_since_excludes_known_prefix() {
        let cache = DeltaCache::new();
        let mut vector = VersionVector::new();
        vector.set("node-a", 2);
        cache.refresh(vec![event("node-a", 1), event("node-a", 2), event("node-a", 3)], vector);

        let mut remote = VersionVector::new();
        remote.set("node-a", 2);
        let (events, _) = cache.delta_since(&remote, 100);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].version.actor_counter, 3);
    }

    #[test]
    fn limit_is_respected() {
        let cache = DeltaCache::new();
        cache.refresh(vec![event("node-a", 1), event("node-a", 2)], VersionVector::new());
        let (events, _) = cache.delta_since(&VersionVector::new(), 1);
        assert_eq!(events.len(), 1);
    }
}
