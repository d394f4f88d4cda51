use hive_core::{NodeId, PeerInfo, VersionVector};
use hive_db::Database;
use hive_replication::TableRegistry;
use hive_store::DurableStore;
use serde::{Deserialize, Serialize};

use crate::error::ClusterResult;
use crate::LOG_TARGET;

const PEER_DELTA_LIMIT: usize = 4000;
const RECENT_CACHE_LIMIT: u32 = 20_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncMetrics {
    pub local_events_emitted: usize,
    pub imported_events_applied: usize,
    pub merged_duplicate_stories: usize,
    pub durable_log_entries_appended: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct DeltaRequestBody {
    version_vector: VersionVector,
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct DeltaResponseBody {
    events: Vec<hive_core::ClusterEvent>,
    #[allow(dead_code)]
    version_vector: VersionVector,
}

/// Runs one sync cycle: scan local changes, pull and apply deltas from
/// every peer, run the story merger, rescan if anything changed, refresh
/// the caller-supplied read cache, and durably log every event the raft
/// log doesn't have yet.
#[allow(clippy::too_many_arguments)]
pub async fn sync(
    db: &Database,
    registry: &TableRegistry,
    http: &reqwest::Client,
    node_id: &NodeId,
    peers: &[PeerInfo],
    similarity_threshold: f64,
    durable_store: Option<&DurableStore>,
    current_term: u64,
    mut refresh_cache: impl FnMut(Vec<hive_core::ClusterEvent>, VersionVector),
) -> ClusterResult<SyncMetrics> {
    let mut metrics = SyncMetrics::default();

    metrics.local_events_emitted = hive_replication::scan_local_changes(db, registry, node_id)?;

    for peer in peers {
        let local_vector = db.cluster_events_version_vector()?;
        let Some(events) = fetch_peer_delta(http, peer, &local_vector).await else {
            continue;
        };
        if events.is_empty() {
            continue;
        }
        metrics.imported_events_applied += hive_replication::apply_remote_events(db, registry, &events)?;
    }

    metrics.merged_duplicate_stories = hive_replication::run_story_merger(db, similarity_threshold)?;

    if metrics.imported_events_applied > 0 || metrics.merged_duplicate_stories > 0 {
        metrics.local_events_emitted += hive_replication::scan_local_changes(db, registry, node_id)?;
    }

    let recent = db.cluster_events_recent(RECENT_CACHE_LIMIT)?;
    let version_vector = db.cluster_events_version_vector()?;
    refresh_cache(recent, version_vector);

    if let Some(store) = durable_store {
        let all_events = db.cluster_events_all_ordered()?;
        let unknown: Vec<_> = all_events.into_iter().filter(|e| !store.has_event(&e.event_id)).collect();
        metrics.durable_log_entries_appended = store.append_cluster_events(&unknown, current_term)?;
    }

    Ok(metrics)
}

async fn fetch_peer_delta(
    http: &reqwest::Client,
    peer: &PeerInfo,
    local_vector: &VersionVector,
) -> Option<Vec<hive_core::ClusterEvent>> {
    let endpoint = peer.url.join("cluster/v1/events/delta").ok()?;
    let body = DeltaRequestBody { version_vector: local_vector.clone(), limit: PEER_DELTA_LIMIT };
    let response = match http.post(endpoint).json(&body).send().await {
        Ok(response) => response,
        Err(error) => {
            tracing::debug!(target: LOG_TARGET, peer = %peer.id, %error, "delta fetch failed");
            return None;
        }
    };
    if !response.status().is_success() {
        return None;
    }
    response.json::<DeltaResponseBody>().await.ok().map(|body| body.events)
}
