use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use hive_core::NodeId;
use hive_store::{DurableStore, EntryType, NewLogEntry, StatePatch};
use rand::Rng;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::types::{
    ClusterStatus, ElectionConfig, HeartbeatRequest, HeartbeatResponse, RequestVoteRequest,
    RequestVoteResponse, Role,
};

const LOG_TARGET: &str = "hive::election";
const ELECTION_TICK_MS: u64 = 250;

/// In-memory fields that live alongside the durable raft state but never
/// need to survive a restart: the current role and the deadline that, once
/// passed, starts a new election.
struct Volatile {
    role: Role,
    election_deadline_ms: i64,
    last_heartbeat_sent_ms: i64,
}

/// Drives the follower/candidate/leader state machine for one node. Wraps a
/// [`DurableStore`] for every state transition that must survive a restart
/// and talks to peers over plain HTTP via `reqwest`.
pub struct ElectionRuntime {
    config: ElectionConfig,
    store: Arc<DurableStore>,
    volatile: RwLock<Volatile>,
    election_in_flight: AtomicBool,
    client: reqwest::Client,
}

impl ElectionRuntime {
    pub fn new(config: ElectionConfig, store: Arc<DurableStore>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .expect("reqwest client");
        let deadline = hive_core::now_ms() + random_timeout_ms(&config);
        Self {
            config,
            store,
            volatile: RwLock::new(Volatile {
                role: Role::Follower,
                election_deadline_ms: deadline,
                last_heartbeat_sent_ms: 0,
            }),
            election_in_flight: AtomicBool::new(false),
            client,
        }
    }

    /// The durable store this runtime persists its raft state to, shared
    /// with the caller so it can append replicated-event log entries under
    /// the same node directory.
    pub fn durable_store(&self) -> &Arc<DurableStore> {
        &self.store
    }

    pub fn node_id(&self) -> &NodeId {
        &self.config.node_id
    }

    fn quorum(&self) -> usize {
        let total_nodes = self.config.peers.len() + 1;
        total_nodes / 2 + 1
    }

    fn leader_url_for(&self, leader_id: &NodeId) -> Option<url::Url> {
        if leader_id == &self.config.node_id {
            return Some(self.config.public_url.clone());
        }
        self.config
            .peers
            .iter()
            .find(|peer| &peer.id == leader_id)
            .map(|peer| peer.url.clone())
    }

    pub async fn get_status(&self) -> ClusterStatus {
        let state = self.store.get_state();
        let volatile = self.volatile.read().await;
        let leader_url = state.leader_id.as_ref().and_then(|id| self.leader_url_for(id));
        ClusterStatus {
            node_id: self.config.node_id.clone(),
            role: volatile.role,
            term: state.current_term,
            voted_for: state.voted_for,
            is_leader: volatile.role == Role::Leader,
            leader_id: state.leader_id,
            leader_url,
            commit_index: state.commit_index,
            last_applied: state.last_applied,
            last_log_index: state.last_log_index,
            last_log_term: state.last_log_term,
            peers: self.config.peers.clone(),
        }
    }

    /// Steps down to follower at `term`, clearing `voted_for`. Used both
    /// when we observe a strictly greater term and when a heartbeat at our
    /// own term tells us someone else already leads.
    async fn step_down(&self, term: u64, leader_id: Option<NodeId>) {
        self.store
            .set_state(StatePatch {
                current_term: Some(term),
                voted_for: Some(None),
                leader_id: Some(leader_id),
                ..Default::default()
            })
            .ok();
        {
            let mut volatile = self.volatile.write().await;
            volatile.role = Role::Follower;
            volatile.election_deadline_ms = hive_core::now_ms() + random_timeout_ms(&self.config);
        }
        if let Err(error) = self.store.append_entry(NewLogEntry {
            entry_type: Some(EntryType::StateTransition),
            term: Some(term),
            ..Default::default()
        }) {
            tracing::warn!(target: LOG_TARGET, %error, term, "failed to append step-down entry");
        }
    }

    async fn refresh_deadline(&self) {
        let mut volatile = self.volatile.write().await;
        volatile.election_deadline_ms = hive_core::now_ms() + random_timeout_ms(&self.config);
    }

    pub async fn handle_request_vote(&self, req: RequestVoteRequest) -> RequestVoteResponse {
        if req.candidate_id.is_empty() {
            let state = self.store.get_state();
            return RequestVoteResponse { term: state.current_term, vote_granted: false, leader_id: state.leader_id };
        }
        let candidate_id = NodeId::new(req.candidate_id);
        let mut state = self.store.get_state();

        if req.term < state.current_term {
            return RequestVoteResponse { term: state.current_term, vote_granted: false, leader_id: state.leader_id };
        }
        if req.term > state.current_term {
            self.step_down(req.term, None).await;
            state = self.store.get_state();
        }

        let can_grant = state.voted_for.is_none() || state.voted_for.as_ref() == Some(&candidate_id);
        if !can_grant {
            return RequestVoteResponse { term: state.current_term, vote_granted: false, leader_id: state.leader_id };
        }

        self.store
            .set_state(StatePatch { voted_for: Some(Some(candidate_id.clone())), ..Default::default() })
            .ok();
        self.store
            .append_entry(NewLogEntry {
                entry_type: Some(EntryType::VoteGranted),
                term: Some(req.term),
                source_node_id: Some(candidate_id.clone()),
                ..Default::default()
            })
            .ok();
        self.refresh_deadline().await;

        tracing::info!(target: LOG_TARGET, term = req.term, candidate = %candidate_id, "granted vote");
        RequestVoteResponse { term: req.term, vote_granted: true, leader_id: None }
    }

    pub async fn handle_heartbeat(&self, req: HeartbeatRequest) -> HeartbeatResponse {
        let mut state = self.store.get_state();
        if req.term < state.current_term {
            return HeartbeatResponse { term: state.current_term, success: false };
        }
        if req.term > state.current_term {
            self.step_down(req.term, None).await;
            state = self.store.get_state();
        }

        let leader_id = NodeId::new(req.leader_id);
        self.store
            .set_state(StatePatch {
                current_term: Some(state.current_term),
                leader_id: Some(Some(leader_id.clone())),
                ..Default::default()
            })
            .ok();
        {
            let mut volatile = self.volatile.write().await;
            volatile.role = Role::Follower;
        }
        self.refresh_deadline().await;

        tracing::debug!(target: LOG_TARGET, term = req.term, leader = %leader_id, "heartbeat accepted");
        HeartbeatResponse { term: req.term, success: true }
    }

    /// Begins a new election if our deadline has passed and no election is
    /// already in flight for this node. Guarded by `election_in_flight` so
    /// tick jitter can't launch two concurrent elections.
    #[instrument(skip(self), ret)]
    pub async fn tick(&self) {
        let role = self.volatile.read().await.role;
        match role {
            Role::Leader => self.maybe_send_heartbeats().await,
            Role::Follower | Role::Candidate => self.maybe_start_election().await,
        }
    }

    /// Leaders are ticked every [`ELECTION_TICK_MS`], but heartbeats go out
    /// only once `heartbeat_interval_ms` has actually elapsed since the last
    /// one, so the two timers run on their own, independently configured
    /// cadences despite sharing one ticker task.
    async fn maybe_send_heartbeats(&self) {
        let due = {
            let volatile = self.volatile.read().await;
            hive_core::now_ms() - volatile.last_heartbeat_sent_ms >= self.config.heartbeat_interval_ms as i64
        };
        if !due {
            return;
        }
        {
            let mut volatile = self.volatile.write().await;
            volatile.last_heartbeat_sent_ms = hive_core::now_ms();
        }
        self.send_heartbeats().await;
    }

    async fn maybe_start_election(&self) {
        let deadline_passed = {
            let volatile = self.volatile.read().await;
            hive_core::now_ms() >= volatile.election_deadline_ms
        };
        if !deadline_passed {
            return;
        }
        if self
            .election_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let result = self.run_election().await;
        self.election_in_flight.store(false, Ordering::SeqCst);
        if let Err(err) = result {
            tracing::warn!(target: LOG_TARGET, error = %err, "election attempt failed");
        }
    }

    async fn run_election(&self) -> Result<(), String> {
        let state = self.store.get_state();
        let term = state.current_term + 1;
        self.store
            .set_state(StatePatch {
                current_term: Some(term),
                voted_for: Some(Some(self.config.node_id.clone())),
                leader_id: Some(None),
                ..Default::default()
            })
            .map_err(|e| e.to_string())?;
        {
            let mut volatile = self.volatile.write().await;
            volatile.role = Role::Candidate;
            volatile.election_deadline_ms = hive_core::now_ms() + random_timeout_ms(&self.config);
        }
        self.store
            .append_entry(NewLogEntry {
                entry_type: Some(EntryType::ElectionStart),
                term: Some(term),
                ..Default::default()
            })
            .ok();
        tracing::info!(target: LOG_TARGET, term, "starting election");

        let votes_needed = self.quorum();
        let mut votes = 1usize; // our own

        if !self.config.peers.is_empty() {
            let ballots = join_all(self.config.peers.iter().map(|peer| {
                let client = self.client.clone();
                let url = peer.url.clone();
                let body = RequestVoteRequest { term, candidate_id: self.config.node_id.to_string() };
                async move { request_vote(&client, &url, &body).await }
            }))
            .await;

            for ballot in ballots.into_iter().flatten() {
                if ballot.term > term {
                    self.step_down(ballot.term, ballot.leader_id).await;
                    return Ok(());
                }
                if ballot.vote_granted {
                    votes += 1;
                }
            }
        }

        let still_candidate = {
            let volatile = self.volatile.read().await;
            volatile.role == Role::Candidate
        };
        let current_term_unchanged = self.store.get_state().current_term == term;
        if votes >= votes_needed && still_candidate && current_term_unchanged {
            self.become_leader(term).await;
        }
        Ok(())
    }

    async fn become_leader(&self, term: u64) {
        self.store
            .set_state(StatePatch {
                leader_id: Some(Some(self.config.node_id.clone())),
                voted_for: Some(None),
                ..Default::default()
            })
            .ok();
        {
            let mut volatile = self.volatile.write().await;
            volatile.role = Role::Leader;
            volatile.last_heartbeat_sent_ms = 0;
        }
        self.store
            .append_entry(NewLogEntry {
                entry_type: Some(EntryType::ElectionWon),
                term: Some(term),
                source_node_id: Some(self.config.node_id.clone()),
                ..Default::default()
            })
            .ok();
        tracing::info!(target: LOG_TARGET, term, "won election, became leader");
    }

    async fn send_heartbeats(&self) {
        if self.config.peers.is_empty() {
            return;
        }
        let state = self.store.get_state();
        let body = HeartbeatRequest { term: state.current_term, leader_id: self.config.node_id.to_string() };
        self.store
            .append_entry(NewLogEntry {
                entry_type: Some(EntryType::HeartbeatSent),
                term: Some(state.current_term),
                ..Default::default()
            })
            .ok();

        let responses = join_all(self.config.peers.iter().map(|peer| {
            let client = self.client.clone();
            let url = peer.url.clone();
            let body = body.clone();
            async move { send_heartbeat(&client, &url, &body).await }
        }))
        .await;

        for response in responses.into_iter().flatten() {
            if response.term > state.current_term {
                self.step_down(response.term, None).await;
                return;
            }
        }
    }
}

fn random_timeout_ms(config: &ElectionConfig) -> i64 {
    let min = config.election_timeout_min_ms;
    let max = config.election_timeout_max_ms.max(min);
    if max == min {
        return min as i64;
    }
    rand::rng().random_range(min..=max) as i64
}

async fn request_vote(
    client: &reqwest::Client,
    peer_url: &url::Url,
    body: &RequestVoteRequest,
) -> Option<RequestVoteResponse> {
    let endpoint = peer_url.join("cluster/v1/election/request-vote").ok()?;
    let response = client.post(endpoint).json(body).send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    response.json::<RequestVoteResponse>().await.ok()
}

async fn send_heartbeat(
    client: &reqwest::Client,
    peer_url: &url::Url,
    body: &HeartbeatRequest,
) -> Option<HeartbeatResponse> {
    let endpoint = peer_url.join("cluster/v1/election/heartbeat").ok()?;
    let response = client.post(endpoint).json(body).send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    response.json::<HeartbeatResponse>().await.ok()
}

pub const fn election_tick_interval() -> Duration {
    Duration::from_millis(ELECTION_TICK_MS)
}

#[cfg(test)]
mod tests {
    use hive_core::PeerInfo;
    use tempfile::tempdir;

    use super::*;

    fn single_node_config(node_id: &str) -> ElectionConfig {
        ElectionConfig {
            node_id: NodeId::new(node_id),
            public_url: url::Url::parse("http://127.0.0.1:7000").unwrap(),
            peers: Vec::new(),
            heartbeat_interval_ms: 2000,
            election_timeout_min_ms: 10,
            election_timeout_max_ms: 10,
            request_timeout_ms: 1000,
        }
    }

    fn runtime_with(config: ElectionConfig) -> ElectionRuntime {
        let dir = tempdir().unwrap();
        let store = DurableStore::load(dir.path().to_path_buf(), config.node_id.clone()).unwrap();
        ElectionRuntime::new(config, Arc::new(store))
    }

    #[tokio::test]
    async fn single_node_cluster_self_elects_on_first_tick() {
        let runtime = runtime_with(single_node_config("solo"));
        tokio::time::sleep(Duration::from_millis(15)).await;
        runtime.tick().await;
        let status = runtime.get_status().await;
        assert!(status.is_leader);
        assert_eq!(status.role, Role::Leader);
        assert_eq!(status.leader_id, Some(NodeId::new("solo")));
    }

    #[tokio::test]
    async fn vote_is_refused_for_stale_term() {
        let runtime = runtime_with(single_node_config("n1"));
        runtime
            .store
            .set_state(StatePatch { current_term: Some(5), ..Default::default() })
            .unwrap();
        let response = runtime
            .handle_request_vote(RequestVoteRequest { term: 3, candidate_id: "n2".into() })
            .await;
        assert!(!response.vote_granted);
        assert_eq!(response.term, 5);
    }

    #[tokio::test]
    async fn repeated_vote_from_same_candidate_in_same_term_is_granted_again() {
        let runtime = runtime_with(single_node_config("n1"));
        let first = runtime
            .handle_request_vote(RequestVoteRequest { term: 1, candidate_id: "n2".into() })
            .await;
        let second = runtime
            .handle_request_vote(RequestVoteRequest { term: 1, candidate_id: "n2".into() })
            .await;
        assert!(first.vote_granted);
        assert!(second.vote_granted);
    }

    #[tokio::test]
    async fn vote_for_a_different_candidate_in_same_term_is_refused() {
        let runtime = runtime_with(single_node_config("n1"));
        runtime
            .handle_request_vote(RequestVoteRequest { term: 1, candidate_id: "n2".into() })
            .await;
        let second = runtime
            .handle_request_vote(RequestVoteRequest { term: 1, candidate_id: "n3".into() })
            .await;
        assert!(!second.vote_granted);
    }

    #[tokio::test]
    async fn higher_term_vote_request_forces_step_down_and_clears_vote() {
        let runtime = runtime_with(single_node_config("n1"));
        runtime
            .store
            .set_state(StatePatch {
                current_term: Some(2),
                voted_for: Some(Some(NodeId::new("n1"))),
                ..Default::default()
            })
            .unwrap();
        {
            let mut volatile = runtime.volatile.write().await;
            volatile.role = Role::Candidate;
        }
        let response = runtime
            .handle_request_vote(RequestVoteRequest { term: 5, candidate_id: "n9".into() })
            .await;
        assert!(response.vote_granted);
        assert_eq!(runtime.volatile.read().await.role, Role::Follower);
    }

    #[tokio::test]
    async fn heartbeat_at_current_term_keeps_us_follower_and_sets_leader() {
        let runtime = runtime_with(single_node_config("n1"));
        let response = runtime
            .handle_heartbeat(HeartbeatRequest { term: 0, leader_id: "n2".into() })
            .await;
        assert!(response.success);
        let status = runtime.get_status().await;
        assert_eq!(status.leader_id, Some(NodeId::new("n2")));
        assert_eq!(status.role, Role::Follower);
    }

    #[tokio::test]
    async fn heartbeat_with_stale_term_is_rejected() {
        let runtime = runtime_with(single_node_config("n1"));
        runtime
            .store
            .set_state(StatePatch { current_term: Some(9), ..Default::default() })
            .unwrap();
        let response = runtime
            .handle_heartbeat(HeartbeatRequest { term: 4, leader_id: "n2".into() })
            .await;
        assert!(!response.success);
        assert_eq!(response.term, 9);
    }

    #[tokio::test]
    async fn quorum_of_three_node_cluster_requires_two_votes() {
        let mut config = single_node_config("n1");
        config.peers = vec![
            PeerInfo { id: NodeId::new("n2"), url: url::Url::parse("http://127.0.0.1:7001").unwrap() },
            PeerInfo { id: NodeId::new("n3"), url: url::Url::parse("http://127.0.0.1:7002").unwrap() },
        ];
        let runtime = runtime_with(config);
        assert_eq!(runtime.quorum(), 2);
    }
}
