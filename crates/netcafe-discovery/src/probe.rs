//! ICMP echo probing of tracked addresses

use async_trait::async_trait;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::{DiscoveryError, Result};

/// Default per-probe timeout in milliseconds
pub const PROBE_TIMEOUT_MS: u64 = 1500;

/// Something that can tell which of a set of hosts answer right now
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Return the subset of `hosts` that answered.
    ///
    /// An unreachable or timed-out host is simply absent from the result;
    /// an error means the probe run as a whole could not be carried out.
    async fn probe(&self, hosts: &[Ipv4Addr]) -> Result<HashSet<Ipv4Addr>>;
}

/// Probes hosts with one `ping` per address, all in parallel
#[derive(Debug, Clone)]
pub struct PingProbe {
    timeout: Duration,
}

impl PingProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for PingProbe {
    fn default() -> Self {
        Self::new(Duration::from_millis(PROBE_TIMEOUT_MS))
    }
}

#[async_trait]
impl ReachabilityProbe for PingProbe {
    async fn probe(&self, hosts: &[Ipv4Addr]) -> Result<HashSet<Ipv4Addr>> {
        let mut tasks = JoinSet::new();

        for &host in hosts {
            let limit = self.timeout;
            tasks.spawn(async move {
                if ping_host(host, limit).await {
                    Some(host)
                } else {
                    None
                }
            });
        }

        let mut reachable = HashSet::new();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Some(ip)) => {
                    reachable.insert(ip);
                }
                Ok(None) => {}
                Err(e) => return Err(DiscoveryError::Probe(e.to_string())),
            }
        }

        debug!(
            "Ping results: {}/{} reachable",
            reachable.len(),
            hosts.len()
        );
        Ok(reachable)
    }
}

/// Send a single echo request, bounded by `limit`
async fn ping_host(ip: Ipv4Addr, limit: Duration) -> bool {
    let mut command = Command::new("ping");
    command
        .args(ping_args(ip))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    match timeout(limit, command.status()).await {
        Ok(Ok(status)) => {
            trace!(ip = %ip, success = status.success(), "Ping finished");
            status.success()
        }
        Ok(Err(e)) => {
            debug!(ip = %ip, error = %e, "Failed to run ping");
            false
        }
        Err(_) => {
            debug!(ip = %ip, timeout_ms = limit.as_millis() as u64, "Ping timed out");
            false
        }
    }
}

#[cfg(windows)]
fn ping_args(ip: Ipv4Addr) -> Vec<String> {
    // -w is the reply timeout in milliseconds
    vec![
        "-n".to_string(),
        "1".to_string(),
        "-w".to_string(),
        "500".to_string(),
        ip.to_string(),
    ]
}

#[cfg(not(windows))]
fn ping_args(ip: Ipv4Addr) -> Vec<String> {
    vec![
        "-c".to_string(),
        "1".to_string(),
        "-W".to_string(),
        "1".to_string(),
        ip.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_args_single_packet() {
        let args = ping_args(Ipv4Addr::new(192, 168, 1, 38));
        assert_eq!(args.last().map(String::as_str), Some("192.168.1.38"));
        assert!(args.contains(&"1".to_string()));
    }

    #[tokio::test]
    async fn test_timed_out_hosts_are_unreachable() {
        // TEST-NET-1, never answers
        let hosts = [
            Ipv4Addr::new(192, 0, 2, 10),
            Ipv4Addr::new(192, 0, 2, 11),
            Ipv4Addr::new(192, 0, 2, 12),
        ];
        let probe = PingProbe::new(Duration::from_millis(1));

        let started = std::time::Instant::now();
        let reachable = probe.probe(&hosts).await.unwrap();

        assert!(reachable.is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_empty_host_list() {
        let probe = PingProbe::default();
        let reachable = probe.probe(&[]).await.unwrap();
        assert!(reachable.is_empty());
    }
}
