//! Configuration loading and validation

use anyhow::{Context, Result};
use netcafe_core::{DeviceConfig, Room, SceneTargets, DEFAULT_GRACE_SECS};
use netcafe_discovery::ScannerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default, rename = "room")]
    pub rooms: Vec<RoomConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for web server
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Presence poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Delay between setup attempts while no neighbor table is usable
    #[serde(default = "default_setup_retry")]
    pub setup_retry_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            poll_interval_secs: default_poll_interval(),
            setup_retry_secs: default_setup_retry(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_setup_retry() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Per-ping timeout
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    /// Overall timeout for `ip neigh` / `arp`
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
    /// Grace window for rooms that don't set their own
    #[serde(default = "default_grace")]
    pub default_grace_secs: u64,
    /// Run ping-only instead of retrying when no neighbor table works
    #[serde(default)]
    pub ping_only_fallback: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout(),
            command_timeout_ms: default_command_timeout(),
            default_grace_secs: default_grace(),
            ping_only_fallback: false,
        }
    }
}

fn default_probe_timeout() -> u64 {
    netcafe_discovery::probe::PROBE_TIMEOUT_MS
}

fn default_command_timeout() -> u64 {
    netcafe_discovery::neighbor::COMMAND_TIMEOUT_MS
}

fn default_grace() -> u64 {
    DEFAULT_GRACE_SECS
}

/// A room and the computers in it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    pub name: String,
    #[serde(default)]
    pub computers: Vec<Ipv4Addr>,
    /// Overrides `discovery.default_grace_secs` for this room
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_secs: Option<u64>,
    /// Light entities switched with occupancy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lights: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub climates: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub covers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dnd_switch: Option<String>,
}

impl RoomConfig {
    pub fn targets(&self) -> SceneTargets {
        SceneTargets {
            lights: self.lights.clone(),
            climates: self.climates.clone(),
            covers: self.covers.clone(),
            dnd_switch: self.dnd_switch.clone(),
        }
    }
}

impl Config {
    /// Convert to ScannerConfig
    pub fn to_scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            interval_secs: self.daemon.poll_interval_secs,
            probe_timeout_ms: self.discovery.probe_timeout_ms,
            command_timeout_ms: self.discovery.command_timeout_ms,
        }
    }

    /// Tracked devices in config order.
    ///
    /// An address listed more than once is tracked once, under the first room
    /// that lists it.
    pub fn to_device_configs(&self) -> Vec<DeviceConfig> {
        let mut seen = HashSet::new();
        let mut devices = Vec::new();

        for room in &self.rooms {
            let grace = room.grace_secs.unwrap_or(self.discovery.default_grace_secs);
            for &ip in &room.computers {
                if !seen.insert(ip) {
                    warn!(ip = %ip, room = %room.name, "Duplicate computer address, ignoring");
                    continue;
                }
                devices.push(
                    DeviceConfig::new(
                        ip,
                        format!("{} - {}", room.name, ip),
                        Duration::from_secs(grace),
                    )
                    .with_room(room.name.clone()),
                );
            }
        }

        devices
    }

    /// Room layout for occupancy, using the same de-duplication as devices.
    ///
    /// `[[room]]` blocks sharing a name form one room in first-seen order,
    /// with their scene targets merged.
    pub fn to_rooms(&self) -> Vec<Room> {
        let devices = self.to_device_configs();
        let mut rooms: Vec<Room> = Vec::new();

        for room in &self.rooms {
            if let Some(existing) = rooms.iter_mut().find(|r| r.name == room.name) {
                warn!(room = %room.name, "Room listed more than once, merging");
                existing.targets.merge(&room.targets());
                continue;
            }
            let computers = devices
                .iter()
                .filter(|d| d.room.as_deref() == Some(room.name.as_str()))
                .map(|d| d.address)
                .collect();
            rooms.push(Room::new(room.name.clone(), computers).with_targets(room.targets()));
        }

        rooms
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        info!(
            path = %path.display(),
            rooms = config.rooms.len(),
            "Loaded configuration"
        );
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let config = Config {
        daemon: DaemonConfig::default(),
        discovery: DiscoveryConfig::default(),
        rooms: vec![
            RoomConfig {
                name: "Room 38".to_string(),
                computers: vec![Ipv4Addr::new(192, 168, 1, 38), Ipv4Addr::new(192, 168, 1, 39)],
                grace_secs: None,
                lights: vec!["light.room_38".to_string()],
                climates: vec!["climate.room_38".to_string()],
                covers: Vec::new(),
                dnd_switch: Some("switch.room_38_dnd".to_string()),
            },
            RoomConfig {
                name: "Room 40".to_string(),
                computers: vec![Ipv4Addr::new(192, 168, 1, 40)],
                grace_secs: Some(60),
                lights: Vec::new(),
                climates: Vec::new(),
                covers: vec!["cover.room_40_curtain".to_string()],
                dnd_switch: None,
            },
        ],
    };

    let content = toml::to_string_pretty(&config)?;
    std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
