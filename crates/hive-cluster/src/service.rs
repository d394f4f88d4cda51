use std::sync::Arc;
use std::time::Duration;

use hive_core::NodeId;
use hive_db::Database;
use hive_election::{Election, ElectionTicker};
use hive_replication::TableRegistry;
use hive_server::{AppState, DeltaCache, Server};
use hive_store::DurableStore;
use tokio::sync::watch;
use tracing::instrument;

use crate::config::Config;
use crate::error::{ClusterResult, InvalidConfigSnafu};
use crate::sync::SyncMetrics;

/// Wires the durable store, embedded database, election runtime, and HTTP
/// control plane together into one runnable service, and drives the
/// periodic sync loop independently of the election and heartbeat timers.
pub struct ClusterService {
    config: Config,
    db: Database,
    registry: TableRegistry,
    election: Arc<Election>,
    cache: DeltaCache,
    http: reqwest::Client,
    shutdown_tx: Option<watch::Sender<()>>,
    server_addr: Option<std::net::SocketAddr>,
}

impl ClusterService {
    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.config.node_id.clone())
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub async fn is_leader(&self) -> bool {
        self.election.is_leader().await
    }

    pub async fn get_status(&self) -> hive_election::ClusterStatus {
        self.election.get_status().await
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn server_addr(&self) -> Option<std::net::SocketAddr> {
        self.server_addr
    }

    /// Builds the service from configuration, opening (or creating) the
    /// embedded database and, when enabled, the durable raft store.
    pub async fn new(config: Config) -> ClusterResult<Self> {
        config.validate().map_err(|message| InvalidConfigSnafu { message }.build())?;

        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::open(&config.db_path)?;
        db.cluster_state_ensure(&NodeId::new(config.node_id.clone()))?;

        let registry = hive_replication::builtin_registry();
        db.with_connection(|conn| registry.ensure_all_schemas(conn).map_err(|source| hive_db::DbError::Sqlite { source }))?;

        let election = if config.enabled {
            let store = DurableStore::load(config.cluster_dir.clone(), NodeId::new(config.node_id.clone()))?;
            Arc::new(Election::enabled(config.election_config(), Arc::new(store)))
        } else {
            Arc::new(Election::disabled(config.election_config()))
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .expect("reqwest client");

        Ok(Self {
            config,
            db,
            registry,
            election,
            cache: DeltaCache::new(),
            http,
            shutdown_tx: None,
            server_addr: None,
        })
    }

    /// Binds the HTTP listener and spawns the election ticker and sync
    /// loop. A disabled cluster still binds the listener (so `/status`
    /// works) but skips both background tasks.
    pub async fn start(&mut self) -> ClusterResult<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        let state = AppState {
            election: self.election.clone(),
            cache: self.cache.clone(),
            auth_token: self.config.auth_token.clone(),
        };
        let server = Server::bind(&self.config.listen_host, self.config.listen_port, state).await?;
        self.server_addr = server.local_addr().ok();

        let run_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(error) = server.run(run_shutdown).await {
                tracing::warn!(target: crate::LOG_TARGET, %error, "http server exited");
            }
        });

        if self.config.enabled {
            if let Election::Enabled(runtime) = self.election.as_ref() {
                let ticker = ElectionTicker::new(runtime.clone(), shutdown_rx.clone());
                tokio::spawn(ticker.run());
            }
            self.spawn_sync_loop(shutdown_rx.clone());
        }

        self.shutdown_tx = Some(shutdown_tx);
        tracing::info!(target: crate::LOG_TARGET, node_id = %self.config.node_id, "cluster service started");
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            if let Some(store) = self.election.durable_store() {
                if let Err(error) = store.append_entry(hive_store::NewLogEntry::runtime()) {
                    tracing::warn!(target: crate::LOG_TARGET, %error, "failed to append runtime stop entry");
                }
            }
            let _ = tx.send(());
            tracing::info!(target: crate::LOG_TARGET, "cluster service stopped");
        }
    }

    fn spawn_sync_loop(&self, mut shutdown: watch::Receiver<()>) {
        let db = self.db.clone();
        let registry = self.registry.clone();
        let election = self.election.clone();
        let http = self.http.clone();
        let node_id = self.node_id();
        let peers = self.config.peers.clone();
        let similarity_threshold = self.config.story_similarity_threshold;
        let sync_interval = Duration::from_millis(self.config.sync_interval_ms);
        let cache = self.cache.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sync_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        run_sync_once(&db, &registry, &http, &node_id, &peers, similarity_threshold, &election, &cache).await;
                    }
                    res = shutdown.changed() => {
                        if res.is_err() {
                            break;
                        }
                        break;
                    }
                }
            }
        });
    }
}

#[instrument(skip(db, registry, http, election, cache), ret)]
async fn run_sync_once(
    db: &Database,
    registry: &TableRegistry,
    http: &reqwest::Client,
    node_id: &NodeId,
    peers: &[hive_core::PeerInfo],
    similarity_threshold: f64,
    election: &Election,
    cache: &DeltaCache,
) -> SyncMetrics {
    let status = election.get_status().await;
    let durable_store = election.durable_store().map(|store| store.as_ref());
    let cache = cache.clone();
    let result = crate::sync::sync(
        db,
        registry,
        http,
        node_id,
        peers,
        similarity_threshold,
        durable_store,
        status.term,
        |events, vector| cache.refresh(events, vector),
    )
    .await;

    match result {
        Ok(metrics) => metrics,
        Err(error) => {
            tracing::warn!(target: crate::LOG_TARGET, %error, "sync cycle failed");
            SyncMetrics::default()
        }
    }
}
