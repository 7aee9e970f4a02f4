//! Application state management

use anyhow::Result;
use chrono::{DateTime, Utc};
use netcafe_core::{
    DeviceState, OccupancyChange, OccupancyTracker, ReloadSummary, Room, RoomStatus,
};
use netcafe_discovery::{DiscoveryError, PresenceEvent, PresenceScanner, StateListener};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::config::{self, Config};

/// Event fanned out to WebSocket clients
#[derive(Debug, Clone)]
pub enum AppEvent {
    Presence(PresenceEvent),
    Occupancy(OccupancyChange),
}

#[derive(Default)]
struct OccupancyInner {
    online: HashMap<Ipv4Addr, bool>,
    tracker: OccupancyTracker,
}

/// Derives room occupancy from the scanner's per-cycle device reports
pub struct OccupancyListener {
    inner: Mutex<OccupancyInner>,
    events: broadcast::Sender<AppEvent>,
}

impl OccupancyListener {
    pub fn new(rooms: Vec<Room>, events: broadcast::Sender<AppEvent>) -> Self {
        Self {
            inner: Mutex::new(OccupancyInner {
                online: HashMap::new(),
                tracker: OccupancyTracker::new(rooms),
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, OccupancyInner> {
        // Only plain map writes happen under the lock
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Swap the room layout and forget addresses no room lists
    pub fn set_rooms(&self, rooms: Vec<Room>) {
        let mut inner = self.lock();
        inner
            .online
            .retain(|ip, _| rooms.iter().any(|r| r.computers.contains(ip)));
        inner.tracker.set_rooms(rooms);
    }

    /// Occupancy of every room for the given device states
    pub fn status(&self, states: &[DeviceState]) -> Vec<RoomStatus> {
        self.lock().tracker.status(states)
    }
}

impl StateListener for OccupancyListener {
    fn on_state_changed(&self, address: Ipv4Addr, online: bool) {
        self.lock().online.insert(address, online);
    }

    fn on_cycle_finished(&self, at: DateTime<Utc>) {
        let changes = {
            let mut inner = self.lock();
            let OccupancyInner { online, tracker } = &mut *inner;
            tracker.update_from(online, at)
        };
        for change in changes {
            let _ = self.events.send(AppEvent::Occupancy(change));
        }
    }
}

/// Shared application state
pub struct AppState {
    /// Presence scanner
    pub scanner: Arc<PresenceScanner>,
    /// Room occupancy, fed by the scanner as a state listener
    pub occupancy: Arc<OccupancyListener>,
    /// Configuration as last loaded
    pub config: RwLock<Config>,
    /// File `reload` re-reads
    pub config_path: PathBuf,
    /// Event broadcast for WebSocket clients
    pub events: broadcast::Sender<AppEvent>,
}

impl AppState {
    /// Create new application state, waiting for the scanner to come up
    pub async fn new(config: Config, config_path: PathBuf) -> Result<Arc<Self>> {
        let scanner = setup_scanner(&config).await?;
        Ok(Self::with_scanner(config, config_path, scanner).await)
    }

    /// Create state around an already built scanner, register the occupancy
    /// listener and start forwarding scanner events
    pub async fn with_scanner(
        config: Config,
        config_path: PathBuf,
        scanner: PresenceScanner,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        let occupancy = Arc::new(OccupancyListener::new(config.to_rooms(), events.clone()));
        scanner.add_listener(occupancy.clone()).await;

        let state = Arc::new(Self {
            scanner: Arc::new(scanner),
            occupancy,
            config: RwLock::new(config),
            config_path,
            events,
        });

        // Start forwarding scanner events
        let events = state.events.clone();
        let mut rx = state.scanner.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let _ = events.send(AppEvent::Presence(event));
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(skipped = n, "Presence event channel lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        state
    }

    /// Get all devices
    pub async fn devices(&self) -> Vec<DeviceState> {
        self.scanner.devices().await
    }

    /// Occupancy of every configured room right now
    pub async fn rooms(&self) -> Vec<RoomStatus> {
        let states = self.scanner.devices().await;
        self.occupancy.status(&states)
    }

    /// Re-read the configuration file and swap the tracked set
    pub async fn reload(&self) -> Result<ReloadSummary> {
        let config = config::load_config(&self.config_path)?;
        let summary = self.scanner.reload(config.to_device_configs()).await;
        self.occupancy.set_rooms(config.to_rooms());

        let current = self.config.read().await.to_scanner_config();
        let next = config.to_scanner_config();
        if current.interval_secs != next.interval_secs
            || current.probe_timeout_ms != next.probe_timeout_ms
            || current.command_timeout_ms != next.command_timeout_ms
        {
            warn!("Scanner timing changes take effect after a restart");
        }
        *self.config.write().await = config;

        info!(
            added = summary.added.len(),
            removed = summary.removed.len(),
            kept = summary.kept.len(),
            "Configuration reloaded"
        );

        // Refresh right away so new devices don't wait a full interval
        if let Err(e) = self.scanner.force_cycle().await {
            warn!(error = %e, "Refresh after reload failed");
        }

        Ok(summary)
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.events.subscribe()
    }
}

/// Build the scanner, retrying while no neighbor table is usable.
///
/// With `ping_only_fallback` set the first failure degrades to ping-only
/// detection instead.
async fn setup_scanner(config: &Config) -> Result<PresenceScanner> {
    let retry = Duration::from_secs(config.daemon.setup_retry_secs.max(1));
    let devices = config.to_device_configs();

    loop {
        match PresenceScanner::new(config.to_scanner_config(), devices.clone()).await {
            Ok(scanner) => {
                info!(
                    strategy = ?scanner.neighbor_strategy(),
                    devices = devices.len(),
                    "Presence scanner ready"
                );
                return Ok(scanner);
            }
            Err(DiscoveryError::NoNeighborTable) if config.discovery.ping_only_fallback => {
                return Ok(PresenceScanner::ping_only(config.to_scanner_config(), devices));
            }
            Err(DiscoveryError::NoNeighborTable) => {
                warn!(
                    retry_secs = retry.as_secs(),
                    "No neighbor table available yet, retrying setup"
                );
                tokio::time::sleep(retry).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
