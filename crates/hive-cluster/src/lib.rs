//! Wires the election, replication, durable store, and HTTP crates
//! together into one runnable multi-node coordination service.

mod config;
mod error;
mod service;
mod sync;

const LOG_TARGET: &str = "hive::cluster";

pub use config::Config;
pub use error::{ClusterError, ClusterResult};
pub use service::ClusterService;
pub use sync::SyncMetrics;
