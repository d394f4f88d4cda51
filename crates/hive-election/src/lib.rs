//! The follower/candidate/leader election state machine: vote and
//! heartbeat handling, the election and heartbeat tick tasks, and the
//! disabled-mode pass-through used when the cluster subsystem is switched
//! off entirely.

mod disabled;
mod runtime;
mod tasks;
mod types;

pub use disabled::DisabledElection;
pub use runtime::{election_tick_interval, ElectionRuntime};
pub use tasks::ElectionTicker;
pub use types::{
    ClusterStatus, ElectionConfig, HeartbeatRequest, HeartbeatResponse, RequestVoteRequest,
    RequestVoteResponse, Role,
};

use std::sync::Arc;

/// Either a live election runtime or the synthetic disabled-mode stand-in,
/// chosen once at startup from configuration and shared behind an `Arc` by
/// the HTTP handlers and the tick task.
pub enum Election {
    Enabled(Arc<ElectionRuntime>),
    Disabled(DisabledElection),
}

impl Election {
    pub fn enabled(config: ElectionConfig, store: Arc<hive_store::DurableStore>) -> Self {
        Self::Enabled(Arc::new(ElectionRuntime::new(config, store)))
    }

    /// The durable store backing this node, when election is enabled.
    /// `None` in disabled mode, since there is no raft state to persist.
    pub fn durable_store(&self) -> Option<&Arc<hive_store::DurableStore>> {
        match self {
            Election::Enabled(runtime) => Some(runtime.durable_store()),
            Election::Disabled(_) => None,
        }
    }

    pub fn disabled(config: ElectionConfig) -> Self {
        Self::Disabled(DisabledElection::new(config))
    }

    pub async fn get_status(&self) -> ClusterStatus {
        match self {
            Election::Enabled(runtime) => runtime.get_status().await,
            Election::Disabled(disabled) => disabled.get_status(),
        }
    }

    pub async fn is_leader(&self) -> bool {
        match self {
            Election::Enabled(runtime) => runtime.get_status().await.is_leader,
            Election::Disabled(_) => true,
        }
    }

    pub async fn handle_request_vote(&self, req: RequestVoteRequest) -> RequestVoteResponse {
        match self {
            Election::Enabled(runtime) => runtime.handle_request_vote(req).await,
            Election::Disabled(disabled) => disabled.handle_request_vote(req),
        }
    }

    pub async fn handle_heartbeat(&self, req: HeartbeatRequest) -> HeartbeatResponse {
        match self {
            Election::Enabled(runtime) => runtime.handle_heartbeat(req).await,
            Election::Disabled(disabled) => disabled.handle_heartbeat(req),
        }
    }
}
