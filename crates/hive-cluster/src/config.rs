use std::path::PathBuf;

use hive_core::PeerInfo;
use serde::{Deserialize, Serialize};

/// The single configuration struct covering every tunable of the
/// coordination core: whether it runs at all, this node's identity and
/// bind address, its peers, and every timer and threshold the election,
/// sync, and merger subsystems use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub enabled: bool,
    pub node_id: String,
    pub listen_host: String,
    pub listen_port: u16,
    pub public_url: url::Url,
    pub peers: Vec<PeerInfo>,
    pub auth_token: Option<String>,
    pub heartbeat_interval_ms: u64,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub sync_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub story_similarity_threshold: f64,
    /// Directory holding `raft-state.json` and `raft-log.ndjson` for this
    /// node.
    pub cluster_dir: PathBuf,
    /// Path to the embedded SQLite database file.
    pub db_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            node_id: "node-1".to_owned(),
            listen_host: "127.0.0.1".to_owned(),
            listen_port: 7420,
            public_url: url::Url::parse("http://127.0.0.1:7420").expect("valid default url"),
            peers: Vec::new(),
            auth_token: None,
            heartbeat_interval_ms: 2_000,
            election_timeout_min_ms: 3_000,
            election_timeout_max_ms: 6_000,
            sync_interval_ms: 5_000,
            request_timeout_ms: 5_000,
            story_similarity_threshold: 0.92,
            cluster_dir: PathBuf::from("./hive-data"),
            db_path: PathBuf::from("./hive-data/hive.sqlite3"),
        }
    }
}

impl Config {
    /// Checks the invariants `start()` must refuse on: a threshold outside
    /// `[0, 1]`, or a non-loopback bind with no `auth_token` configured.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.story_similarity_threshold) {
            return Err(format!(
                "story_similarity_threshold must be within [0, 1], got {}",
                self.story_similarity_threshold
            ));
        }
        let is_loopback = self.listen_host == "localhost"
            || self
                .listen_host
                .parse::<std::net::IpAddr>()
                .map(|ip| ip.is_loopback())
                .unwrap_or(false);
        if !is_loopback && self.auth_token.is_none() {
            return Err(format!(
                "listen_host {} is not loopback and no auth_token is configured",
                self.listen_host
            ));
        }
        Ok(())
    }

    pub(crate) fn election_config(&self) -> hive_election::ElectionConfig {
        hive_election::ElectionConfig {
            node_id: hive_core::NodeId::new(self.node_id.clone()),
            public_url: self.public_url.clone(),
            peers: self.peers.clone(),
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            election_timeout_min_ms: self.election_timeout_min_ms,
            election_timeout_max_ms: self.election_timeout_max_ms,
            request_timeout_ms: self.request_timeout_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let config = Config { story_similarity_threshold: 1.5, ..Config::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_loopback_without_auth_token_is_rejected() {
        let config = Config { listen_host: "0.0.0.0".to_owned(), ..Config::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_loopback_with_auth_token_is_accepted() {
        let config = Config {
            listen_host: "0.0.0.0".to_owned(),
            auth_token: Some("secret".to_owned()),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }
}
