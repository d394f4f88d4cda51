use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use hive_core::{NodeId, PeerInfo};

#[derive(Debug, Parser)]
#[command(version, about = "Coordination core for a multi-node agent fleet", long_about = None)]
pub struct Opts {
    #[command(subcommand)]
    pub cmd: OptsCmd,
}

#[derive(Debug, Subcommand)]
pub enum OptsCmd {
    /// Run this node: binds the HTTP control plane and, unless disabled,
    /// runs leader election and the periodic sync loop.
    Serve(ServeOpts),
    /// Print the effective configuration (defaults, config file, and CLI
    /// overrides merged) as TOML, without starting anything.
    PrintConfig(ServeOpts),
}

#[derive(Debug, Args)]
pub struct ServeOpts {
    /// Path to a TOML config file. CLI flags below override its values.
    #[arg(long, env = "HIVE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Disables election and replication; the HTTP control plane still
    /// binds and reports this node as the (sole) leader.
    #[arg(long)]
    pub disabled: bool,

    #[arg(long, env = "HIVE_NODE_ID")]
    pub node_id: Option<String>,

    #[arg(long, env = "HIVE_LISTEN_HOST")]
    pub listen_host: Option<String>,

    #[arg(long, env = "HIVE_LISTEN_PORT")]
    pub listen_port: Option<u16>,

    #[arg(long, env = "HIVE_PUBLIC_URL")]
    pub public_url: Option<url::Url>,

    /// A peer as `node_id=http://host:port`. Repeatable.
    #[arg(long = "peer", value_parser = parse_peer)]
    pub peers: Vec<PeerInfo>,

    #[arg(long, env = "HIVE_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    #[arg(long, env = "HIVE_CLUSTER_DIR")]
    pub cluster_dir: Option<PathBuf>,

    #[arg(long, env = "HIVE_DB_PATH")]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub heartbeat_interval_ms: Option<u64>,

    #[arg(long)]
    pub election_timeout_min_ms: Option<u64>,

    #[arg(long)]
    pub election_timeout_max_ms: Option<u64>,

    #[arg(long)]
    pub sync_interval_ms: Option<u64>,

    #[arg(long)]
    pub request_timeout_ms: Option<u64>,

    #[arg(long)]
    pub story_similarity_threshold: Option<f64>,
}

fn parse_peer(raw: &str) -> Result<PeerInfo, String> {
    let (id, url) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected `node_id=url`, got {raw:?}"))?;
    let url = url::Url::parse(url).map_err(|error| format!("invalid peer url {url:?}: {error}"))?;
    Ok(PeerInfo { id: NodeId::new(id), url })
}

/// Merges a config file (if given), then CLI overrides, on top of
/// [`hive_cluster::Config::default`].
pub fn resolve_config(opts: &ServeOpts) -> Result<hive_cluster::Config, String> {
    let mut config = match &opts.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|error| format!("failed to read {}: {error}", path.display()))?;
            toml::from_str(&raw).map_err(|error| format!("failed to parse {}: {error}", path.display()))?
        }
        None => hive_cluster::Config::default(),
    };

    if opts.disabled {
        config.enabled = false;
    }
    if let Some(node_id) = &opts.node_id {
        config.node_id = node_id.clone();
    }
    if let Some(host) = &opts.listen_host {
        config.listen_host = host.clone();
    }
    if let Some(port) = opts.listen_port {
        config.listen_port = port;
    }
    if let Some(url) = &opts.public_url {
        config.public_url = url.clone();
    }
    if !opts.peers.is_empty() {
        config.peers = opts.peers.clone();
    }
    if opts.auth_token.is_some() {
        config.auth_token = opts.auth_token.clone();
    }
    if let Some(dir) = &opts.cluster_dir {
        config.cluster_dir = dir.clone();
    }
    if let Some(path) = &opts.db_path {
        config.db_path = path.clone();
    }
    if let Some(ms) = opts.heartbeat_interval_ms {
        config.heartbeat_interval_ms = ms;
    }
    if let Some(ms) = opts.election_timeout_min_ms {
        config.election_timeout_min_ms = ms;
    }
    if let Some(ms) = opts.election_timeout_max_ms {
        config.election_timeout_max_ms = ms;
    }
    if let Some(ms) = opts.sync_interval_ms {
        config.sync_interval_ms = ms;
    }
    if let Some(ms) = opts.request_timeout_ms {
        config.request_timeout_ms = ms;
    }
    if let Some(threshold) = opts.story_similarity_threshold {
        config.story_similarity_threshold = threshold;
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_flag_parses_id_and_url() {
        let peer = parse_peer("node-2=http://10.0.0.2:7420").unwrap();
        assert_eq!(peer.id, NodeId::new("node-2"));
        assert_eq!(peer.url.as_str(), "http://10.0.0.2:7420/");
    }

    #[test]
    fn peer_flag_without_equals_is_rejected() {
        assert!(parse_peer("node-2").is_err());
    }

    #[test]
    fn cli_override_replaces_default_node_id() {
        let opts = ServeOpts {
            config: None,
            disabled: false,
            node_id: Some("node-7".to_owned()),
            listen_host: None,
            listen_port: None,
            public_url: None,
            peers: Vec::new(),
            auth_token: None,
            cluster_dir: None,
            db_path: None,
            heartbeat_interval_ms: None,
            election_timeout_min_ms: None,
            election_timeout_max_ms: None,
            sync_interval_ms: None,
            request_timeout_ms: None,
            story_similarity_threshold: None,
        };
        let config = resolve_config(&opts).unwrap();
        assert_eq!(config.node_id, "node-7");
    }
}
