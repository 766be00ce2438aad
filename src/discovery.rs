use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;

/// Hosts probed in parallel per batch; bounded to avoid fd exhaustion.
const SCAN_BATCH: usize = 50;

const LOOPBACK: &str = "127.0.0.1";

/// Which tier produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryTier {
    Fast,
    Metadata,
    Scan,
}

impl DiscoveryTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryTier::Fast => "fast",
            DiscoveryTier::Metadata => "metadata",
            DiscoveryTier::Scan => "scan",
        }
    }
}

/// A reachable source: an address that answered on a candidate port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub address: String,
    pub port: u16,
    pub tier: DiscoveryTier,
}

/// Self-description a source serves on `/info`. Bodies missing the address
/// or port are treated as malformed and discarded.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceInfo {
    #[serde(default)]
    pub camera_id: Option<u32>,
    pub port: u16,
    pub ip_address: String,
    #[serde(default)]
    pub stream_url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Tiered reachability search over the candidate port list.
///
/// Tiers run in order and each stops early once every port has produced a
/// finding: probe this machine first, then ask operator-supplied hosts to
/// describe themselves, then sweep the local /24. Every finding is handed to
/// the caller the moment it is confirmed; nothing waits for the full sweep.
/// Absence of a source is a normal outcome, not an error.
pub struct Discovery {
    ports: Vec<u16>,
    cfg: DiscoveryConfig,
}

impl Discovery {
    pub fn new(ports: Vec<u16>, cfg: DiscoveryConfig) -> Self {
        Self { ports, cfg }
    }

    pub async fn run<F>(&self, mut on_found: F) -> Vec<Finding>
    where
        F: FnMut(&Finding),
    {
        let mut findings: Vec<Finding> = Vec::new();
        let mut resolved: HashSet<u16> = HashSet::new();
        if self.ports.is_empty() {
            return findings;
        }
        let started = Instant::now();
        let probe_timeout = Duration::from_millis(self.cfg.probe_timeout_millis);

        // Fast tier: loopback plus this machine's own LAN address.
        let mut fast_hosts = vec![LOOPBACK.to_string()];
        if let Some(local) = local_address() {
            if !fast_hosts.contains(&local) {
                fast_hosts.push(local);
            }
        }
        debug!(hosts = fast_hosts.len(), ports = self.ports.len(), "discovery fast tier");
        self.probe_tier(
            DiscoveryTier::Fast,
            &fast_hosts,
            probe_timeout,
            &mut resolved,
            &mut findings,
            &mut on_found,
        )
        .await;

        // Metadata tier: hinted hosts answer /info directly.
        if resolved.len() < self.ports.len() && !self.cfg.known_hosts.is_empty() {
            debug!(hints = self.cfg.known_hosts.len(), "discovery metadata tier");
            self.metadata_tier(&mut resolved, &mut findings, &mut on_found).await;
        }

        // Scan tier: sweep the /24 for whatever is still missing.
        if resolved.len() < self.ports.len() {
            match self.cfg.subnet.clone().or_else(detect_local_subnet) {
                Some(prefix) => {
                    let hosts: Vec<String> =
                        (1u8..=254).map(|h| format!("{}.{}", prefix, h)).collect();
                    info!(
                        subnet = %prefix,
                        unresolved = self.ports.len() - resolved.len(),
                        "discovery scan tier"
                    );
                    self.probe_tier(
                        DiscoveryTier::Scan,
                        &hosts,
                        probe_timeout,
                        &mut resolved,
                        &mut findings,
                        &mut on_found,
                    )
                    .await;
                }
                None => warn!("no local subnet detected, skipping scan tier"),
            }
        }

        info!(
            found = findings.len(),
            expected = self.ports.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "discovery finished"
        );
        findings
    }

    /// TCP-probe every host in `hosts` on each still-unresolved port,
    /// batched to SCAN_BATCH blocking tasks at a time. First answer per
    /// port wins; later answers for the same port are ignored.
    async fn probe_tier<F>(
        &self,
        tier: DiscoveryTier,
        hosts: &[String],
        timeout: Duration,
        resolved: &mut HashSet<u16>,
        findings: &mut Vec<Finding>,
        on_found: &mut F,
    ) where
        F: FnMut(&Finding),
    {
        for batch in hosts.chunks(SCAN_BATCH) {
            let ports = self.unresolved_ports(resolved);
            if ports.is_empty() {
                return;
            }

            let mut handles = Vec::with_capacity(batch.len());
            for host in batch {
                let host = host.clone();
                let ports = ports.clone();
                handles.push(tokio::task::spawn_blocking(move || {
                    let mut open = Vec::new();
                    for &port in &ports {
                        if probe_port(&host, port, timeout) {
                            open.push(port);
                        }
                    }
                    (host, open)
                }));
            }

            for handle in handles {
                let Ok((host, open)) = handle.await else {
                    continue;
                };
                for port in open {
                    if !resolved.insert(port) {
                        continue;
                    }
                    let finding = Finding {
                        address: host.clone(),
                        port,
                        tier,
                    };
                    info!(tier = tier.as_str(), address = %finding.address, port, "source found");
                    on_found(&finding);
                    findings.push(finding);
                }
            }
        }
    }

    async fn metadata_tier<F>(
        &self,
        resolved: &mut HashSet<u16>,
        findings: &mut Vec<Finding>,
        on_found: &mut F,
    ) where
        F: FnMut(&Finding),
    {
        let timeout = Duration::from_millis(self.cfg.metadata_timeout_millis);
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(err) => {
                warn!(error = %err, "metadata tier client build failed, skipping tier");
                return;
            }
        };

        // Every host x port query goes out at once; a dead hint only costs
        // its own timeout, never anyone else's.
        let ports = self.unresolved_ports(resolved);
        let mut queries = tokio::task::JoinSet::new();
        for host in &self.cfg.known_hosts {
            for &port in &ports {
                let client = client.clone();
                let host = host.clone();
                queries.spawn(async move {
                    let info = fetch_info(&client, &host, port).await;
                    (host, port, info)
                });
            }
        }

        // Answers are handled in completion order, so a slow host never
        // delays reporting a fast one. First well-formed answer per port
        // wins.
        while let Some(result) = queries.join_next().await {
            let Ok((host, port, Some(info))) = result else {
                continue;
            };
            if !resolved.insert(port) {
                continue;
            }
            let finding = Finding {
                address: host,
                port,
                tier: DiscoveryTier::Metadata,
            };
            info!(
                address = %finding.address,
                port,
                camera_id = ?info.camera_id,
                "source described itself"
            );
            on_found(&finding);
            findings.push(finding);
        }
    }

    fn unresolved_ports(&self, resolved: &HashSet<u16>) -> Vec<u16> {
        self.ports.iter().copied().filter(|p| !resolved.contains(p)).collect()
    }
}

/// Plain TCP reachability check, bounded by `timeout`.
pub fn probe_port(address: &str, port: u16, timeout: Duration) -> bool {
    match format!("{}:{}", address, port).parse::<SocketAddr>() {
        Ok(addr) => TcpStream::connect_timeout(&addr, timeout).is_ok(),
        Err(_) => false,
    }
}

/// One metadata query. Anything but a 2xx with a well-formed body is a miss.
async fn fetch_info(client: &reqwest::Client, address: &str, port: u16) -> Option<SourceInfo> {
    let url = format!("http://{}:{}/info", address, port);
    let response = client.get(&url).send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    response.json::<SourceInfo>().await.ok()
}

fn local_address() -> Option<String> {
    local_ip_address::local_ip().ok().map(|ip| ip.to_string())
}

/// First three octets of this machine's LAN address, e.g. "192.168.1".
pub fn detect_local_subnet() -> Option<String> {
    match local_ip_address::local_ip().ok()? {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            Some(format!("{}.{}.{}", o[0], o[1], o[2]))
        }
        IpAddr::V6(_) => None,
    }
}
