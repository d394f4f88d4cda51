use crate::types::{
    ClusterStatus, ElectionConfig, HeartbeatRequest, HeartbeatResponse, RequestVoteRequest,
    RequestVoteResponse, Role,
};

/// Stand-in used when the cluster subsystem is switched off in
/// configuration: `is_leader()` always reports true, `get_status()` returns
/// a synthetic leader role with zeroed raft counters, and the election RPC
/// handlers never refuse or defer to anyone.
pub struct DisabledElection {
    node_id: hive_core::NodeId,
}

impl DisabledElection {
    pub fn new(config: ElectionConfig) -> Self {
        Self { node_id: config.node_id }
    }

    pub fn get_status(&self) -> ClusterStatus {
        ClusterStatus {
            node_id: self.node_id.clone(),
            role: Role::Leader,
            term: 0,
            voted_for: None,
            is_leader: true,
            leader_id: Some(self.node_id.clone()),
            leader_url: None,
            commit_index: 0,
            last_applied: 0,
            last_log_index: 0,
            last_log_term: 0,
            peers: Vec::new(),
        }
    }

    pub fn handle_request_vote(&self, _req: RequestVoteRequest) -> RequestVoteResponse {
        RequestVoteResponse { term: 0, vote_granted: false, leader_id: Some(self.node_id.clone()) }
    }

    pub fn handle_heartbeat(&self, _req: HeartbeatRequest) -> HeartbeatResponse {
        HeartbeatResponse { term: 0, success: true }
    }
}
