//! Device types for tracking venue computers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Default grace window after the last positive detection
pub const DEFAULT_GRACE_SECS: u64 = 45;

/// Static description of a tracked device, as produced by the config layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// IPv4 address, the identity key
    pub address: Ipv4Addr,
    /// Human-readable title
    pub label: String,
    /// How long the device stays online after it was last seen
    pub grace_window: Duration,
    /// Room the device belongs to (if any)
    pub room: Option<String>,
}

impl DeviceConfig {
    pub fn new(address: Ipv4Addr, label: impl Into<String>, grace_window: Duration) -> Self {
        Self {
            address,
            label: label.into(),
            grace_window,
            room: None,
        }
    }

    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }
}

/// A tracked device and its reachability history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    address: Ipv4Addr,
    /// Human-readable title
    pub label: String,
    /// Room the device belongs to (if any)
    pub room: Option<String>,
    /// Grace window applied after the last positive detection
    pub grace_window: Duration,
    /// True only for the cycle in which a positive signal was observed
    pub raw_reachable: bool,
    /// Most recent positive detection
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Device {
    /// Create a device in the offline state
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            address: config.address,
            label: config.label,
            room: config.room,
            grace_window: config.grace_window,
            raw_reachable: false,
            last_seen_at: None,
        }
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// Whether the device counts as online at `now`.
    ///
    /// Online while the last cycle saw it, or while `now` is still inside the
    /// grace window that started at `last_seen_at`.
    pub fn is_online(&self, now: DateTime<Utc>) -> bool {
        if self.raw_reachable {
            return true;
        }
        match self.since_last_seen(now) {
            Some(elapsed) => elapsed < self.grace_window,
            None => false,
        }
    }

    /// Time elapsed since the last positive detection (zero if the clock went backwards)
    pub fn since_last_seen(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_seen_at
            .map(|seen| (now - seen).to_std().unwrap_or(Duration::ZERO))
    }

    /// Replace the configured attributes, keeping reachability history
    pub fn reconfigure(&mut self, config: DeviceConfig) {
        self.label = config.label;
        self.room = config.room;
        self.grace_window = config.grace_window;
    }

    /// Read-only view of the device at `now`
    pub fn state(&self, now: DateTime<Utc>) -> DeviceState {
        DeviceState {
            address: self.address,
            label: self.label.clone(),
            room: self.room.clone(),
            online: self.is_online(now),
            raw_reachable: self.raw_reachable,
            last_seen_at: self.last_seen_at,
            grace_secs: self.grace_window.as_secs(),
        }
    }
}

/// Snapshot of a device handed to readers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    pub address: Ipv4Addr,
    pub label: String,
    pub room: Option<String>,
    pub online: bool,
    pub raw_reachable: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub grace_secs: u64,
}
