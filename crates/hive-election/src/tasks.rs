use std::sync::Arc;

use tracing::{debug, instrument};

use crate::runtime::{election_tick_interval, ElectionRuntime};

const LOG_TARGET: &str = "hive::election";

/// Drives [`ElectionRuntime::tick`] on the fixed internal 250 ms cadence
/// until `shutdown` fires. One task covers both the election-deadline check
/// and, once leader, the heartbeat fan-out; `tick` itself gates the actual
/// heartbeat send against `heartbeat_interval_ms` so the two timers run on
/// independent cadences despite sharing this ticker.
pub struct ElectionTicker {
    runtime: Arc<ElectionRuntime>,
    shutdown: tokio::sync::watch::Receiver<()>,
}

impl ElectionTicker {
    pub fn new(runtime: Arc<ElectionRuntime>, shutdown: tokio::sync::watch::Receiver<()>) -> Self {
        Self { runtime, shutdown }
    }

    #[instrument(skip(self), ret)]
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(election_tick_interval());
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.runtime.tick().await;
                }
                res = self.shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                    debug!(target: LOG_TARGET, node_id = %self.runtime.node_id(), "election ticker stopping");
                    break;
                }
            }
        }
    }
}
