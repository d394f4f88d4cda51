use hive_core::{NodeId, PeerInfo};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

impl Default for Role {
    fn default() -> Self {
        Role::Follower
    }
}

/// Configuration the election runtime needs: peers, timeouts, and this
/// node's own identity. Mirrors the single cluster-wide config struct's
/// election-relevant fields.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    pub node_id: NodeId,
    pub public_url: url::Url,
    pub peers: Vec<PeerInfo>,
    pub heartbeat_interval_ms: u64,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::new("node"),
            public_url: url::Url::parse("http://127.0.0.1:7420").expect("valid url"),
            peers: Vec::new(),
            heartbeat_interval_ms: 2_000,
            election_timeout_min_ms: 3_000,
            election_timeout_max_ms: 6_000,
            request_timeout_ms: 5_000,
        }
    }
}

/// A snapshot of where this node stands, returned from `GET
/// /cluster/v1/status` and consulted by the sync loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub node_id: NodeId,
    pub role: Role,
    pub term: u64,
    pub voted_for: Option<NodeId>,
    pub is_leader: bool,
    pub leader_id: Option<NodeId>,
    pub leader_url: Option<url::Url>,
    pub commit_index: u64,
    pub last_applied: u64,
    pub last_log_index: u64,
    pub last_log_term: u64,
    pub peers: Vec<PeerInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    pub term: u64,
    pub candidate_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    pub term: u64,
    pub vote_granted: bool,
    pub leader_id: Option<NodeId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub term: u64,
    pub leader_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub term: u64,
    pub success: bool,
}
