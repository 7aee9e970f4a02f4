//! Presence scanner that drives probing, fusion and scheduling

use chrono::{DateTime, Utc};
use netcafe_core::{DeviceConfig, DeviceRegistry, DeviceState, ReloadSummary, Transition};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::fusion::{self, CycleSummary, DetectionCycle};
use crate::neighbor::{default_sources, select_neighbor_source, NeighborSource, NeighborStrategy};
use crate::neighbor::COMMAND_TIMEOUT_MS;
use crate::probe::{PingProbe, ReachabilityProbe, PROBE_TIMEOUT_MS};

/// Scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Poll interval in seconds
    pub interval_secs: u64,
    /// Timeout for a single ping in milliseconds
    pub probe_timeout_ms: u64,
    /// Timeout for a neighbor-table lookup in milliseconds
    pub command_timeout_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            probe_timeout_ms: PROBE_TIMEOUT_MS,
            command_timeout_ms: COMMAND_TIMEOUT_MS,
        }
    }
}

/// Presence event for real-time updates
#[derive(Debug, Clone)]
pub enum PresenceEvent {
    /// A device went online or offline
    Transition(Transition),
    /// Cycle finished and the registry was updated
    CycleCompleted(CycleSummary),
    /// Cycle abandoned, registry untouched
    CycleFailed { error: String },
    /// Tracked device set replaced
    DevicesReloaded { added: usize, removed: usize, total: usize },
}

/// Receives the state of every device after each cycle
pub trait StateListener: Send + Sync {
    fn on_state_changed(&self, address: Ipv4Addr, online: bool);

    /// Called once all devices of the cycle stamped `at` were reported
    fn on_cycle_finished(&self, _at: DateTime<Utc>) {}
}

/// Presence scanner service
pub struct PresenceScanner {
    config: ScannerConfig,
    registry: Arc<RwLock<DeviceRegistry>>,
    prober: Arc<dyn ReachabilityProbe>,
    neighbors: Option<Arc<dyn NeighborSource>>,
    /// Serializes cycles and reloads
    cycle_lock: Mutex<()>,
    listeners: RwLock<Vec<Arc<dyn StateListener>>>,
    last_cycle: RwLock<Option<CycleSummary>>,
    event_tx: broadcast::Sender<PresenceEvent>,
}

impl PresenceScanner {
    /// Create a scanner using ping plus the first neighbor-table strategy
    /// that works on this host.
    ///
    /// Fails with [`DiscoveryError::NoNeighborTable`](crate::DiscoveryError::NoNeighborTable)
    /// when none does; the caller decides whether to retry or fall back to
    /// [`PresenceScanner::ping_only`].
    pub async fn new(config: ScannerConfig, devices: Vec<DeviceConfig>) -> Result<Self> {
        let sources = default_sources(Duration::from_millis(config.command_timeout_ms));
        let neighbors = select_neighbor_source(sources).await?;
        let prober = PingProbe::new(Duration::from_millis(config.probe_timeout_ms));

        Ok(Self::with_sources(
            config,
            devices,
            Arc::new(prober),
            Some(Arc::from(neighbors)),
        ))
    }

    /// Create a degraded scanner that only pings
    pub fn ping_only(config: ScannerConfig, devices: Vec<DeviceConfig>) -> Self {
        warn!("No neighbor table available, presence detection is ping-only");
        let prober = PingProbe::new(Duration::from_millis(config.probe_timeout_ms));
        Self::with_sources(config, devices, Arc::new(prober), None)
    }

    /// Create a scanner from explicit detection sources
    pub fn with_sources(
        config: ScannerConfig,
        devices: Vec<DeviceConfig>,
        prober: Arc<dyn ReachabilityProbe>,
        neighbors: Option<Arc<dyn NeighborSource>>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            registry: Arc::new(RwLock::new(DeviceRegistry::from_configs(devices))),
            prober,
            neighbors,
            cycle_lock: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
            last_cycle: RwLock::new(None),
            event_tx,
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Neighbor-table strategy in use, `None` when ping-only
    pub fn neighbor_strategy(&self) -> Option<NeighborStrategy> {
        self.neighbors.as_ref().map(|n| n.strategy())
    }

    pub fn is_degraded(&self) -> bool {
        self.neighbors.is_none()
    }

    /// Subscribe to presence events
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.event_tx.subscribe()
    }

    /// Register a listener notified after every cycle
    pub async fn add_listener(&self, listener: Arc<dyn StateListener>) {
        self.listeners.write().await.push(listener);
    }

    /// Current state of all devices
    pub async fn devices(&self) -> Vec<DeviceState> {
        self.registry.read().await.snapshot(Utc::now())
    }

    /// Current state of a specific device
    pub async fn get_device(&self, address: Ipv4Addr) -> Option<DeviceState> {
        self.registry
            .read()
            .await
            .get(address)
            .map(|d| d.state(Utc::now()))
    }

    /// Whether a device is online right now, `None` if untracked
    pub async fn is_online(&self, address: Ipv4Addr) -> Option<bool> {
        self.registry.read().await.is_online(address, Utc::now())
    }

    pub async fn last_cycle(&self) -> Option<CycleSummary> {
        self.last_cycle.read().await.clone()
    }

    /// Replace the tracked device set; waits for an in-flight cycle
    pub async fn reload(&self, devices: Vec<DeviceConfig>) -> ReloadSummary {
        let _guard = self.cycle_lock.lock().await;
        let (summary, total) = {
            let mut registry = self.registry.write().await;
            let summary = registry.replace(devices);
            (summary, registry.len())
        };

        let _ = self.event_tx.send(PresenceEvent::DevicesReloaded {
            added: summary.added.len(),
            removed: summary.removed.len(),
            total,
        });
        summary
    }

    /// Run one cycle now, after any cycle already in flight.
    ///
    /// The cycle is stamped once the lock is held, so queued cycles carry
    /// increasing timestamps.
    pub async fn force_cycle(&self) -> Result<DetectionCycle> {
        let _guard = self.cycle_lock.lock().await;
        self.run_locked(Utc::now()).await
    }

    /// Run one cycle stamped with `now`
    pub async fn cycle_at(&self, now: DateTime<Utc>) -> Result<DetectionCycle> {
        let _guard = self.cycle_lock.lock().await;
        self.run_locked(now).await
    }

    /// Body of a cycle; the caller holds `cycle_lock`
    async fn run_locked(&self, now: DateTime<Utc>) -> Result<DetectionCycle> {
        let started = Instant::now();

        let addresses = self.registry.read().await.addresses();
        if addresses.is_empty() {
            debug!("No devices tracked, skipping cycle");
        }

        let (ping, neighbors) = tokio::join!(self.prober.probe(&addresses), self.read_neighbors());

        let ping = match ping {
            Ok(ping) => ping,
            Err(e) => {
                error!(error = %e, "Presence cycle failed, device state unchanged");
                let _ = self.event_tx.send(PresenceEvent::CycleFailed {
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        let (cycle, states) = {
            let mut registry = self.registry.write().await;
            let cycle = fusion::run_cycle(&mut registry, addresses, ping, neighbors, now);
            (cycle, registry.snapshot(now))
        };

        for transition in &cycle.transitions {
            match transition.last_seen_secs {
                Some(secs) => info!(
                    device = %transition.address,
                    label = %transition.label,
                    "Device OFFLINE, last seen {}s ago",
                    secs
                ),
                None => info!(
                    device = %transition.address,
                    label = %transition.label,
                    "Device ONLINE"
                ),
            }
            let _ = self.event_tx.send(PresenceEvent::Transition(transition.clone()));
        }

        let online = states.iter().filter(|s| s.online).count();
        let summary = cycle.summary(online, started.elapsed().as_millis() as u64);
        debug!(
            online = summary.online,
            total = summary.total,
            ping = summary.ping_hits,
            neighbor = summary.neighbor_hits,
            duration_ms = summary.duration_ms,
            "Presence cycle complete"
        );
        *self.last_cycle.write().await = Some(summary.clone());
        let _ = self.event_tx.send(PresenceEvent::CycleCompleted(summary));

        let listeners = self.listeners.read().await.clone();
        for listener in &listeners {
            for state in &states {
                listener.on_state_changed(state.address, state.online);
            }
            listener.on_cycle_finished(now);
        }

        Ok(cycle)
    }

    /// Run cycles on the configured interval until `shutdown` resolves.
    ///
    /// A cycle that overruns the interval delays the next tick; cycles never
    /// overlap.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(Duration::from_secs(self.config.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            interval_secs = self.config.interval_secs,
            strategy = ?self.neighbor_strategy(),
            "Presence scheduler started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Presence scheduler stopped");
                    break;
                }
                _ = ticker.tick() => {
                    // Failures are logged by the cycle; the next tick starts fresh
                    let _ = self.force_cycle().await;
                }
            }
        }
    }

    /// Neighbor-table hits for this cycle; failures mean no signal
    async fn read_neighbors(&self) -> HashSet<Ipv4Addr> {
        let Some(source) = &self.neighbors else {
            return HashSet::new();
        };

        match source.reachable().await {
            Ok(entries) => entries.into_iter().collect(),
            Err(e) => {
                debug!(strategy = %source.strategy(), error = %e, "Neighbor table lookup failed");
                HashSet::new()
            }
        }
    }
}
