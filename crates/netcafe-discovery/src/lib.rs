//! Netcafe Discovery - Presence detection for tracked venue computers
//!
//! This crate decides which configured addresses are online:
//! - ICMP echo probing, one ping per address in parallel
//! - Neighbor-table (ARP cache) lookup with startup strategy selection
//! - OR-fusion of both sources with per-device grace windows
//! - A poll scheduler that serializes cycles and publishes transitions

pub mod error;
pub mod fusion;
pub mod neighbor;
pub mod probe;
pub mod scanner;

pub use error::{DiscoveryError, Result};
pub use fusion::{CycleSummary, DetectionCycle};
pub use neighbor::{NeighborSource, NeighborStrategy};
pub use probe::{PingProbe, ReachabilityProbe};
pub use scanner::{PresenceEvent, PresenceScanner, ScannerConfig, StateListener};
