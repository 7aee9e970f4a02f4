//! Fusion of detection sources and grace-window hysteresis
//!
//! Each cycle merges the ping result and the neighbor-table result with a
//! plain OR, then walks the registry to update every device and report the
//! ones whose online state flipped.

use chrono::{DateTime, Utc};
use netcafe_core::{DeviceRegistry, Direction, Transition};
use serde::Serialize;
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// Everything observed and decided during one poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionCycle {
    pub at: DateTime<Utc>,
    /// Addresses probed, in registry order
    pub probed: Vec<Ipv4Addr>,
    pub ping_reachable: HashSet<Ipv4Addr>,
    /// Neighbor-table hits restricted to tracked addresses
    pub neighbor_reachable: HashSet<Ipv4Addr>,
    pub reachable: HashSet<Ipv4Addr>,
    pub transitions: Vec<Transition>,
}

impl DetectionCycle {
    pub fn summary(&self, online: usize, duration_ms: u64) -> CycleSummary {
        CycleSummary {
            at: self.at,
            total: self.probed.len(),
            online,
            ping_hits: self.ping_reachable.len(),
            neighbor_hits: self.neighbor_reachable.len(),
            transitions: self.transitions.len(),
            duration_ms,
        }
    }
}

/// Compact record of the last completed cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub at: DateTime<Utc>,
    pub total: usize,
    pub online: usize,
    pub ping_hits: usize,
    pub neighbor_hits: usize,
    pub transitions: usize,
    pub duration_ms: u64,
}

/// Addresses positively detected by any source
pub fn fuse(ping: &HashSet<Ipv4Addr>, neighbor: &HashSet<Ipv4Addr>) -> HashSet<Ipv4Addr> {
    ping.union(neighbor).copied().collect()
}

/// Apply one cycle's reachable set to the registry.
///
/// A device's previous state is the one reported by the last committed
/// cycle, so a device that decays past its grace window between cycles
/// still yields an offline transition. Next states for all devices are
/// computed before any device is written, so the registry moves from one
/// complete cycle to the next.
pub fn apply(
    registry: &mut DeviceRegistry,
    reachable: &HashSet<Ipv4Addr>,
    now: DateTime<Utc>,
) -> Vec<Transition> {
    let mut staged = Vec::with_capacity(registry.len());
    let mut transitions = Vec::new();

    for device in registry.iter() {
        let was_online = registry.reported_online(device);

        let mut next = device.clone();
        next.raw_reachable = reachable.contains(&device.address());
        if next.raw_reachable {
            next.last_seen_at = Some(now);
        }
        let is_online = next.is_online(now);

        if is_online != was_online {
            let direction = if is_online {
                Direction::Online
            } else {
                Direction::Offline
            };
            let last_seen_secs = match direction {
                Direction::Online => None,
                Direction::Offline => next.since_last_seen(now).map(|d| d.as_secs()),
            };
            transitions.push(Transition {
                address: next.address(),
                label: next.label.clone(),
                room: next.room.clone(),
                direction,
                at: now,
                last_seen_secs,
            });
        }

        staged.push((next.raw_reachable, next.last_seen_at));
    }

    for (device, (raw_reachable, last_seen_at)) in registry.iter_mut().zip(staged) {
        device.raw_reachable = raw_reachable;
        device.last_seen_at = last_seen_at;
    }
    registry.mark_cycle(now);

    transitions
}

/// Fuse both sources and apply the result to the registry
pub fn run_cycle(
    registry: &mut DeviceRegistry,
    probed: Vec<Ipv4Addr>,
    ping_reachable: HashSet<Ipv4Addr>,
    neighbor_reachable: HashSet<Ipv4Addr>,
    now: DateTime<Utc>,
) -> DetectionCycle {
    let tracked: HashSet<Ipv4Addr> = probed.iter().copied().collect();
    let neighbor_reachable: HashSet<Ipv4Addr> =
        neighbor_reachable.intersection(&tracked).copied().collect();

    let reachable = fuse(&ping_reachable, &neighbor_reachable);
    let transitions = apply(registry, &reachable, now);

    DetectionCycle {
        at: now,
        probed,
        ping_reachable,
        neighbor_reachable,
        reachable,
        transitions,
    }
}
