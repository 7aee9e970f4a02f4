//! Neighbor-table (ARP cache) readers
//!
//! The OS neighbor cache lists hosts that recently exchanged traffic with us.
//! Three strategies obtain it, tried in priority order at startup:
//! - a netlink neighbor dump filtered to `NUD_REACHABLE`
//! - `ip -4 neigh show nud reachable`
//! - legacy `arp -ne`
//!
//! The first strategy that returns entries is kept for the process lifetime.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, trace};

use crate::error::{DiscoveryError, Result};

/// Default timeout for neighbor-table commands in milliseconds
pub const COMMAND_TIMEOUT_MS: u64 = 2000;

/// How the neighbor table is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NeighborStrategy {
    KernelTable,
    IpNeigh,
    ArpCommand,
}

impl fmt::Display for NeighborStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KernelTable => write!(f, "netlink neighbor table"),
            Self::IpNeigh => write!(f, "ip neigh"),
            Self::ArpCommand => write!(f, "arp"),
        }
    }
}

/// A way of listing reachable neighbors
#[async_trait]
pub trait NeighborSource: Send + Sync {
    fn strategy(&self) -> NeighborStrategy;

    /// Addresses the OS currently considers reachable
    async fn reachable(&self) -> Result<Vec<Ipv4Addr>>;
}

/// Kernel neighbor-cache state (`NUD_*`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NudState {
    Reachable,
    Stale,
    Delay,
    Probe,
    Failed,
    Incomplete,
    Permanent,
    Other,
}

/// One IPv4 entry of the kernel neighbor table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
    pub address: Ipv4Addr,
    pub state: NudState,
}

/// Addresses whose entry is confirmed reachable right now.
///
/// STALE and DELAY entries only mean the host answered at some point in the
/// past and are not counted.
pub fn reachable_entries(entries: &[NeighborEntry]) -> Vec<Ipv4Addr> {
    entries
        .iter()
        .filter(|e| e.state == NudState::Reachable)
        .map(|e| e.address)
        .collect()
}

/// Dumps the kernel neighbor table over rtnetlink
#[derive(Debug, Clone)]
pub struct KernelTable {
    timeout: Duration,
}

impl KernelTable {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl NeighborSource for KernelTable {
    fn strategy(&self) -> NeighborStrategy {
        NeighborStrategy::KernelTable
    }

    async fn reachable(&self) -> Result<Vec<Ipv4Addr>> {
        let entries = match timeout(self.timeout, dump_ipv4_neighbors()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(DiscoveryError::Timeout {
                    strategy: self.strategy(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        };

        let reachable = reachable_entries(&entries);
        trace!(
            entries = entries.len(),
            reachable = reachable.len(),
            "Kernel neighbor dump"
        );
        Ok(reachable)
    }
}

#[cfg(target_os = "linux")]
async fn dump_ipv4_neighbors() -> Result<Vec<NeighborEntry>> {
    use futures_util::TryStreamExt;

    let (connection, handle, _) = rtnetlink::new_connection()?;
    let connection = tokio::spawn(connection);

    let mut dump = Box::pin(
        handle
            .neighbours()
            .get()
            .set_family(rtnetlink::IpVersion::V4)
            .execute(),
    );

    let mut entries = Vec::new();
    let result = loop {
        match dump.try_next().await {
            Ok(Some(message)) => entries.extend(neighbor_entry(&message)),
            Ok(None) => break Ok(entries),
            Err(e) => {
                break Err(DiscoveryError::Neighbor {
                    strategy: NeighborStrategy::KernelTable,
                    reason: e.to_string(),
                })
            }
        }
    };

    connection.abort();
    result
}

#[cfg(not(target_os = "linux"))]
async fn dump_ipv4_neighbors() -> Result<Vec<NeighborEntry>> {
    Err(DiscoveryError::Neighbor {
        strategy: NeighborStrategy::KernelTable,
        reason: "netlink is only available on Linux".to_string(),
    })
}

#[cfg(target_os = "linux")]
fn neighbor_entry(
    message: &netlink_packet_route::neighbour::NeighbourMessage,
) -> Option<NeighborEntry> {
    use netlink_packet_route::neighbour::{NeighbourAddress, NeighbourAttribute, NeighbourState};

    let address = message.attributes.iter().find_map(|attr| match attr {
        NeighbourAttribute::Destination(NeighbourAddress::Inet(ip)) => Some(*ip),
        _ => None,
    })?;

    let state = match message.header.state {
        NeighbourState::Reachable => NudState::Reachable,
        NeighbourState::Stale => NudState::Stale,
        NeighbourState::Delay => NudState::Delay,
        NeighbourState::Probe => NudState::Probe,
        NeighbourState::Failed => NudState::Failed,
        NeighbourState::Incomplete => NudState::Incomplete,
        NeighbourState::Permanent => NudState::Permanent,
        _ => NudState::Other,
    };

    Some(NeighborEntry { address, state })
}

/// Runs `ip -4 neigh show nud reachable`
#[derive(Debug, Clone)]
pub struct IpNeigh {
    timeout: Duration,
}

impl IpNeigh {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl NeighborSource for IpNeigh {
    fn strategy(&self) -> NeighborStrategy {
        NeighborStrategy::IpNeigh
    }

    async fn reachable(&self) -> Result<Vec<Ipv4Addr>> {
        let stdout = run_table_command(
            self.strategy(),
            "ip",
            &["-4", "neigh", "show", "nud", "reachable"],
            self.timeout,
        )
        .await?;
        Ok(parse_table_rows(&stdout))
    }
}

/// Runs legacy `arp -ne`
#[derive(Debug, Clone)]
pub struct ArpCommand {
    timeout: Duration,
}

impl ArpCommand {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl NeighborSource for ArpCommand {
    fn strategy(&self) -> NeighborStrategy {
        NeighborStrategy::ArpCommand
    }

    async fn reachable(&self) -> Result<Vec<Ipv4Addr>> {
        let stdout = run_table_command(self.strategy(), "arp", &["-ne"], self.timeout).await?;
        Ok(parse_table_rows(&stdout))
    }
}

/// All strategies in priority order
pub fn default_sources(command_timeout: Duration) -> Vec<Box<dyn NeighborSource>> {
    vec![
        Box::new(KernelTable::new(command_timeout)),
        Box::new(IpNeigh::new(command_timeout)),
        Box::new(ArpCommand::new(command_timeout)),
    ]
}

/// Pick the first strategy that works on this host.
///
/// Candidates are tried in order and the first one returning at least one
/// entry wins; later candidates are never invoked. A strategy that runs but
/// finds nothing is not accepted.
pub async fn select_neighbor_source(
    candidates: Vec<Box<dyn NeighborSource>>,
) -> Result<Box<dyn NeighborSource>> {
    for source in candidates {
        match source.reachable().await {
            Ok(entries) if !entries.is_empty() => {
                info!(
                    strategy = %source.strategy(),
                    entries = entries.len(),
                    "Neighbor table strategy selected"
                );
                return Ok(source);
            }
            Ok(_) => {
                debug!(strategy = %source.strategy(), "Neighbor table strategy returned no entries");
            }
            Err(e) => {
                debug!(strategy = %source.strategy(), error = %e, "Neighbor table strategy unavailable");
            }
        }
    }

    Err(DiscoveryError::NoNeighborTable)
}

/// Run a neighbor-table command and return its stdout
async fn run_table_command(
    strategy: NeighborStrategy,
    program: &str,
    args: &[&str],
    limit: Duration,
) -> Result<String> {
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);

    let output = match timeout(limit, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(DiscoveryError::Neighbor {
                strategy,
                reason: e.to_string(),
            })
        }
        Err(_) => {
            return Err(DiscoveryError::Timeout {
                strategy,
                timeout_ms: limit.as_millis() as u64,
            })
        }
    };

    if !output.status.success() {
        return Err(DiscoveryError::Neighbor {
            strategy,
            reason: format!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `ip neigh` / `arp -n` output.
///
/// Only rows carrying a complete link-layer address (six octets, so five
/// `:` separators) count; the address is the first column.
fn parse_table_rows(output: &str) -> Vec<Ipv4Addr> {
    output
        .lines()
        .filter(|line| line.matches(':').count() == 5)
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|ip| Ipv4Addr::from_str(ip).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_parse_ip_neigh_reachable() {
        let output = "192.168.1.38 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE\n\
                      192.168.1.39 dev eth0 lladdr 11:22:33:44:55:66 REACHABLE\n";
        assert_eq!(
            parse_table_rows(output),
            vec![Ipv4Addr::new(192, 168, 1, 38), Ipv4Addr::new(192, 168, 1, 39)]
        );
    }

    #[test]
    fn test_parse_rows_without_lladdr_are_skipped() {
        let output = "192.168.1.40 dev eth0 INCOMPLETE\n\
                      192.168.1.41 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE\n";
        assert_eq!(parse_table_rows(output), vec![Ipv4Addr::new(192, 168, 1, 41)]);
    }

    #[test]
    fn test_parse_arp_ne_output() {
        let output = "Address                  HWtype  HWaddress           Flags Mask            Iface\n\
                      192.168.1.1              ether   aa:bb:cc:dd:ee:ff   C                     eth0\n\
                      192.168.1.50                     (incomplete)                              eth0\n";
        assert_eq!(parse_table_rows(output), vec![Ipv4Addr::new(192, 168, 1, 1)]);
    }

    #[test]
    fn test_stale_neighbors_are_not_reachable() {
        let entries = vec![
            NeighborEntry {
                address: Ipv4Addr::new(192, 0, 2, 1),
                state: NudState::Stale,
            },
            NeighborEntry {
                address: Ipv4Addr::new(192, 168, 1, 38),
                state: NudState::Reachable,
            },
            NeighborEntry {
                address: Ipv4Addr::new(192, 168, 1, 39),
                state: NudState::Delay,
            },
            NeighborEntry {
                address: Ipv4Addr::new(192, 168, 1, 40),
                state: NudState::Failed,
            },
        ];
        assert_eq!(reachable_entries(&entries), vec![Ipv4Addr::new(192, 168, 1, 38)]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_table_command_non_zero_exit() {
        let result = run_table_command(
            NeighborStrategy::IpNeigh,
            "sh",
            &["-c", "echo boom >&2; exit 3"],
            Duration::from_secs(5),
        )
        .await;

        match result {
            Err(DiscoveryError::Neighbor { strategy, reason }) => {
                assert_eq!(strategy, NeighborStrategy::IpNeigh);
                assert!(reason.contains("boom"));
            }
            other => panic!("expected neighbor error, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_table_command_timeout() {
        let started = std::time::Instant::now();
        let result = run_table_command(
            NeighborStrategy::ArpCommand,
            "sh",
            &["-c", "sleep 5"],
            Duration::from_millis(100),
        )
        .await;

        assert!(matches!(
            result,
            Err(DiscoveryError::Timeout {
                strategy: NeighborStrategy::ArpCommand,
                timeout_ms: 100
            })
        ));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_table_command_missing_program() {
        let result = run_table_command(
            NeighborStrategy::ArpCommand,
            "netcafe-no-such-binary",
            &[],
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(DiscoveryError::Neighbor { .. })));
    }

    struct FakeSource {
        strategy: NeighborStrategy,
        result: Option<Vec<Ipv4Addr>>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NeighborSource for FakeSource {
        fn strategy(&self) -> NeighborStrategy {
            self.strategy
        }

        async fn reachable(&self) -> Result<Vec<Ipv4Addr>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone().ok_or(DiscoveryError::Neighbor {
                strategy: self.strategy,
                reason: "unavailable".to_string(),
            })
        }
    }

    fn fake(
        strategy: NeighborStrategy,
        result: Option<Vec<Ipv4Addr>>,
    ) -> (Box<dyn NeighborSource>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = FakeSource {
            strategy,
            result,
            calls: calls.clone(),
        };
        (Box::new(source), calls)
    }

    #[tokio::test]
    async fn test_select_falls_through_to_second() {
        let (a, a_calls) = fake(NeighborStrategy::KernelTable, None);
        let (b, b_calls) = fake(NeighborStrategy::IpNeigh, Some(vec![Ipv4Addr::new(10, 0, 0, 1)]));
        let (c, c_calls) = fake(NeighborStrategy::ArpCommand, Some(vec![Ipv4Addr::new(10, 0, 0, 1)]));

        let selected = select_neighbor_source(vec![a, b, c]).await.unwrap();
        assert_eq!(selected.strategy(), NeighborStrategy::IpNeigh);
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
        assert_eq!(c_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_select_skips_empty_tables() {
        let (a, _) = fake(NeighborStrategy::KernelTable, Some(Vec::new()));
        let (b, _) = fake(NeighborStrategy::IpNeigh, None);
        let (c, _) = fake(NeighborStrategy::ArpCommand, Some(vec![Ipv4Addr::new(10, 0, 0, 1)]));

        let selected = select_neighbor_source(vec![a, b, c]).await.unwrap();
        assert_eq!(selected.strategy(), NeighborStrategy::ArpCommand);
    }

    #[tokio::test]
    async fn test_select_none_available() {
        let (a, _) = fake(NeighborStrategy::KernelTable, None);
        let (b, _) = fake(NeighborStrategy::IpNeigh, Some(Vec::new()));
        let (c, _) = fake(NeighborStrategy::ArpCommand, None);

        let result = select_neighbor_source(vec![a, b, c]).await;
        assert!(matches!(result, Err(DiscoveryError::NoNeighborTable)));
    }
}
