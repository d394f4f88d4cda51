use std::time::Duration;

use hive_core::{NodeId, PeerInfo};
use hive_cluster::{ClusterService, Config};
use tempfile::tempdir;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

fn node_config(node_id: &str, port: u16, peer_id: &str, peer_port: u16, data_dir: &std::path::Path) -> Config {
    Config {
        enabled: true,
        node_id: node_id.to_owned(),
        listen_host: "127.0.0.1".to_owned(),
        listen_port: port,
        public_url: url::Url::parse(&format!("http://127.0.0.1:{port}")).unwrap(),
        peers: vec![PeerInfo {
            id: NodeId::new(peer_id),
            url: url::Url::parse(&format!("http://127.0.0.1:{peer_port}")).unwrap(),
        }],
        auth_token: None,
        heartbeat_interval_ms: 100,
        election_timeout_min_ms: 250,
        election_timeout_max_ms: 400,
        sync_interval_ms: 150,
        request_timeout_ms: 500,
        story_similarity_threshold: 0.92,
        cluster_dir: data_dir.join(node_id),
        db_path: data_dir.join(node_id).join("hive.sqlite3"),
    }
}

/// Two nodes configured as each other's sole peer converge on exactly one
/// leader within a few election windows.
#[tokio::test(flavor = "multi_thread")]
async fn two_node_cluster_elects_exactly_one_leader() {
    let dir = tempdir().unwrap();
    let port_a = free_port();
    let port_b = free_port();

    let mut node_a = ClusterService::new(node_config("node-a", port_a, "node-b", port_b, dir.path()))
        .await
        .unwrap();
    let mut node_b = ClusterService::new(node_config("node-b", port_b, "node-a", port_a, dir.path()))
        .await
        .unwrap();

    node_a.start().await.unwrap();
    node_b.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let leaders = [node_a.is_leader().await, node_b.is_leader().await];
    assert_eq!(
        leaders.iter().filter(|&&is_leader| is_leader).count(),
        1,
        "expected exactly one leader, got {leaders:?}"
    );

    node_a.stop();
    node_b.stop();
}

/// A row written locally on one node shows up on its peer once the sync
/// loop has had a chance to run.
#[tokio::test(flavor = "multi_thread")]
async fn local_write_replicates_to_peer() {
    let dir = tempdir().unwrap();
    let port_a = free_port();
    let port_b = free_port();

    let mut node_a = ClusterService::new(node_config("node-a", port_a, "node-b", port_b, dir.path()))
        .await
        .unwrap();
    let mut node_b = ClusterService::new(node_config("node-b", port_b, "node-a", port_a, dir.path()))
        .await
        .unwrap();

    node_a.start().await.unwrap();
    node_b.start().await.unwrap();

    node_a
        .database()
        .run(
            "INSERT INTO teams (id, name, created_at) VALUES (?1, ?2, ?3)",
            &[&"team-1", &"Night Shift", &1_700_000_000_i64],
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(2000)).await;

    let replicated: Option<String> = node_b
        .database()
        .query_one(
            "SELECT name FROM teams WHERE id = ?1",
            &[&"team-1"],
            |row| row.get(0),
        )
        .unwrap();

    assert_eq!(replicated.as_deref(), Some("Night Shift"));

    node_a.stop();
    node_b.stop();
}
