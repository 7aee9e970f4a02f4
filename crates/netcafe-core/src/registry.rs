//! In-memory registry of tracked devices

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

use crate::device::{Device, DeviceConfig, DeviceState};

/// Result of swapping the tracked device set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub added: Vec<Ipv4Addr>,
    pub removed: Vec<Ipv4Addr>,
    pub kept: Vec<Ipv4Addr>,
}

/// Ordered set of devices keyed by address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
    index: HashMap<Ipv4Addr, usize>,
    /// Instant of the last committed detection cycle
    last_cycle_at: Option<DateTime<Utc>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configured devices, all starting offline
    pub fn from_configs(configs: impl IntoIterator<Item = DeviceConfig>) -> Self {
        let mut registry = Self::new();
        registry.replace(configs);
        registry
    }

    /// Swap the tracked set for `configs`.
    ///
    /// Addresses that survive keep their reachability history, new ones start
    /// offline and missing ones are dropped. Duplicate addresses keep the
    /// first entry.
    pub fn replace(&mut self, configs: impl IntoIterator<Item = DeviceConfig>) -> ReloadSummary {
        let mut previous: HashMap<Ipv4Addr, Device> = self
            .devices
            .drain(..)
            .map(|d| (d.address(), d))
            .collect();
        self.index.clear();

        let mut summary = ReloadSummary::default();
        for config in configs {
            let address = config.address;
            if self.index.contains_key(&address) {
                warn!(ip = %address, "Duplicate device address in configuration, ignoring");
                continue;
            }

            let device = match previous.remove(&address) {
                Some(mut existing) => {
                    existing.reconfigure(config);
                    summary.kept.push(address);
                    existing
                }
                None => {
                    debug!(ip = %address, label = %config.label, "Tracking new device");
                    summary.added.push(address);
                    Device::new(config)
                }
            };

            self.index.insert(address, self.devices.len());
            self.devices.push(device);
        }

        summary.removed = previous.into_keys().collect();
        summary.removed.sort();

        info!(
            total = self.devices.len(),
            added = summary.added.len(),
            removed = summary.removed.len(),
            "Device registry updated"
        );
        summary
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, address: Ipv4Addr) -> Option<&Device> {
        self.index.get(&address).map(|&i| &self.devices[i])
    }

    pub fn get_mut(&mut self, address: Ipv4Addr) -> Option<&mut Device> {
        match self.index.get(&address) {
            Some(&i) => self.devices.get_mut(i),
            None => None,
        }
    }

    /// Devices in configuration order
    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Device> {
        self.devices.iter_mut()
    }

    /// Tracked addresses in configuration order
    pub fn addresses(&self) -> Vec<Ipv4Addr> {
        self.devices.iter().map(Device::address).collect()
    }

    pub fn last_cycle_at(&self) -> Option<DateTime<Utc>> {
        self.last_cycle_at
    }

    /// Record that a detection cycle stamped `at` was committed
    pub fn mark_cycle(&mut self, at: DateTime<Utc>) {
        self.last_cycle_at = Some(at);
    }

    /// Online state a device was reported with by the last committed cycle
    pub fn reported_online(&self, device: &Device) -> bool {
        self.last_cycle_at.is_some_and(|at| device.is_online(at))
    }

    /// Online state of one device, derived at `now`
    pub fn is_online(&self, address: Ipv4Addr, now: DateTime<Utc>) -> Option<bool> {
        self.get(address).map(|d| d.is_online(now))
    }

    /// Views of every device at `now`
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<DeviceState> {
        self.devices.iter().map(|d| d.state(now)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn cfg(last: u8, label: &str) -> DeviceConfig {
        DeviceConfig::new(
            Ipv4Addr::new(192, 168, 1, last),
            label,
            Duration::from_secs(45),
        )
    }

    #[test]
    fn test_from_configs_keeps_order() {
        let registry = DeviceRegistry::from_configs(vec![cfg(40, "a"), cfg(38, "b"), cfg(39, "c")]);
        assert_eq!(
            registry.addresses(),
            vec![
                Ipv4Addr::new(192, 168, 1, 40),
                Ipv4Addr::new(192, 168, 1, 38),
                Ipv4Addr::new(192, 168, 1, 39),
            ]
        );
    }

    #[test]
    fn test_duplicate_address_keeps_first() {
        let registry = DeviceRegistry::from_configs(vec![cfg(38, "first"), cfg(38, "second")]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(Ipv4Addr::new(192, 168, 1, 38)).unwrap().label, "first");
    }

    #[test]
    fn test_replace_keeps_history_for_survivors() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut registry = DeviceRegistry::from_configs(vec![cfg(38, "a"), cfg(39, "b")]);
        {
            let d = registry.get_mut(Ipv4Addr::new(192, 168, 1, 38)).unwrap();
            d.raw_reachable = true;
            d.last_seen_at = Some(now);
        }

        let summary = registry.replace(vec![cfg(38, "renamed"), cfg(50, "new")]);
        assert_eq!(summary.kept, vec![Ipv4Addr::new(192, 168, 1, 38)]);
        assert_eq!(summary.added, vec![Ipv4Addr::new(192, 168, 1, 50)]);
        assert_eq!(summary.removed, vec![Ipv4Addr::new(192, 168, 1, 39)]);

        let kept = registry.get(Ipv4Addr::new(192, 168, 1, 38)).unwrap();
        assert_eq!(kept.label, "renamed");
        assert_eq!(kept.last_seen_at, Some(now));
        assert!(registry.get(Ipv4Addr::new(192, 168, 1, 39)).is_none());
        assert_eq!(registry.is_online(Ipv4Addr::new(192, 168, 1, 50), now), Some(false));
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut registry = DeviceRegistry::from_configs(vec![cfg(38, "a"), cfg(39, "b")]);
        registry.get_mut(Ipv4Addr::new(192, 168, 1, 39)).unwrap().raw_reachable = true;

        let snapshot = registry.snapshot(now);
        assert_eq!(snapshot.len(), 2);
        assert!(!snapshot[0].online);
        assert!(snapshot[1].online);
    }

    #[test]
    fn test_reported_online_uses_last_cycle_instant() {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut registry = DeviceRegistry::from_configs(vec![cfg(38, "a")]);
        let ip = Ipv4Addr::new(192, 168, 1, 38);
        assert!(!registry.reported_online(registry.get(ip).unwrap()));

        {
            let d = registry.get_mut(ip).unwrap();
            d.raw_reachable = false;
            d.last_seen_at = Some(t0);
        }
        registry.mark_cycle(t0 + chrono::Duration::seconds(40));
        assert!(registry.reported_online(registry.get(ip).unwrap()));
        assert!(!registry.is_online(ip, t0 + chrono::Duration::seconds(50)).unwrap());
    }
}
