//! Error types for presence detection

use thiserror::Error;

use crate::neighbor::NeighborStrategy;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// No neighbor-table strategy works on this host
    #[error("no neighbor table mechanism available on this host")]
    NoNeighborTable,
    /// The probe fan-out itself failed; the cycle is abandoned
    #[error("probe failed: {0}")]
    Probe(String),
    #[error("{strategy} lookup failed: {reason}")]
    Neighbor {
        strategy: NeighborStrategy,
        reason: String,
    },
    #[error("{strategy} lookup timed out after {timeout_ms} ms")]
    Timeout {
        strategy: NeighborStrategy,
        timeout_ms: u64,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
