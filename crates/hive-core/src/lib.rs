//! Primitive types shared by every coordination-core crate: node identity,
//! causal versions, cluster events, version vectors, and the canonical-JSON
//! codec used both for payload hashing and for the wire format.

mod canonical;
mod event;
mod node;
mod version;

pub use canonical::{canonical_json, hash_canonical, sha256_hex};
pub use event::{ClusterEvent, Op};
pub use node::{NodeId, PeerInfo};
pub use version::{CausalVersion, VersionVector};

/// Millisecond-resolution wall clock timestamp, the unit `logical_ts` is
/// expressed in everywhere in this codebase.
pub fn now_ms() -> i64 {
    let now = time::OffsetDateTime::now_utc();
    now.unix_timestamp() * 1000 + i64::from(now.millisecond())
}
