//! # Network Discovery
//!
//! Runs the per-interface sweeps, merges sightings into one device set,
//! and keeps the device table that every other component reads. A scan
//! combines three passes: the neighbour table (cheap, authoritative for
//! MACs), a bounded-concurrency reachability sweep, and an optional port
//! fingerprinting pass over whatever answered.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use pnet::util::MacAddr;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use sever_common::config::Config;
use sever_common::network::device::{Device, DeviceKey};
use sever_common::network::interface::Interface;
use sever_common::network::range;

use crate::scanner::neighbors::{self, NeighborEntry};
use crate::scanner::probe;

/// Result of one scan. `partial` is set when the overall deadline fired
/// before every probe completed; whatever was found is still returned.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub devices: Vec<Device>,
    pub partial: bool,
}

/// Merge key for cross-interface de-duplication: hardware address when
/// known, else address + interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MergeKey {
    Mac(MacAddr),
    AddrOnIface(IpAddr, String),
}

fn merge_key(device: &Device) -> MergeKey {
    match device.mac {
        Some(mac) => MergeKey::Mac(mac),
        None => MergeKey::AddrOnIface(device.addr, device.interface.clone()),
    }
}

/// Sweeps every given interface and returns the merged device set.
/// Per-host failures are contained: a silent host is simply absent, and
/// hitting `cfg.scan_deadline` flags the report partial instead of
/// hanging.
pub async fn scan(interfaces: &[Interface], cfg: &Config) -> ScanReport {
    let neighbor_table = neighbors::read_neighbor_table();
    let mut report = ScanReport::default();
    let mut merged: HashMap<MergeKey, Device> = HashMap::new();

    let overall_deadline = tokio::time::Instant::now() + cfg.scan_deadline;

    for intf in interfaces {
        let (found, hit_deadline) =
            sweep_interface(intf, &neighbor_table, cfg, overall_deadline).await;
        if hit_deadline {
            warn!(interface = %intf.name, "scan deadline hit, returning partial results");
            report.partial = true;
        }

        for device in found {
            match merged.get_mut(&merge_key(&device)) {
                Some(existing) => existing.merge_sighting(&device),
                None => {
                    merged.insert(merge_key(&device), device);
                }
            }
        }
    }

    report.devices = merged.into_values().collect();
    report
        .devices
        .sort_by_key(|d| (!d.protected, d.addr));
    report
}

/// One interface's sweep: neighbour hits first, then probes for the rest
/// of the host range under the concurrency cap, then fingerprint ports
/// on everything that answered. Returns whatever was found plus whether
/// the deadline cut the sweep short.
async fn sweep_interface(
    intf: &Interface,
    neighbor_table: &[NeighborEntry],
    cfg: &Config,
    deadline: tokio::time::Instant,
) -> (Vec<Device>, bool) {
    let Some((network, prefix)) = intf.network else {
        debug!(interface = %intf.name, "no derived subnet, skipping sweep");
        return (Vec::new(), false);
    };

    let mut found: HashMap<IpAddr, Device> = HashMap::new();

    // Pass 1: neighbour-table entries inside this subnet.
    for entry in neighbor_table {
        if intf.contains(entry.addr) && entry.interface == intf.name {
            let device =
                Device::new(IpAddr::V4(entry.addr), &intf.name).with_mac(entry.mac);
            found.insert(device.addr, device);
        }
    }

    // The scanning host is always present on its own interface.
    let mut local = Device::new(IpAddr::V4(intf.addr), &intf.name);
    local.mac = intf.mac;
    local.protected = true;
    found.insert(local.addr, local);

    // Pass 2: bounded-concurrency reachability probes for the remainder.
    let semaphore = Arc::new(Semaphore::new(cfg.probe_concurrency.max(1)));
    let mut probes: JoinSet<Option<IpAddr>> = JoinSet::new();

    for candidate in range::host_range(network, prefix).to_iter() {
        let addr = IpAddr::V4(candidate);
        if found.contains_key(&addr) {
            continue;
        }
        let permit_pool = semaphore.clone();
        let probe_timeout = cfg.probe_timeout;
        probes.spawn(async move {
            let _permit = permit_pool.acquire_owned().await.ok()?;
            probe::reachability_probe(addr, probe_timeout)
                .await
                .map(|_| addr)
        });
    }

    let mut hit_deadline = false;
    loop {
        match tokio::time::timeout_at(deadline, probes.join_next()).await {
            Ok(Some(Ok(Some(addr)))) => {
                found.insert(addr, Device::new(addr, &intf.name));
            }
            Ok(Some(Ok(None))) => {}
            Ok(Some(Err(e))) => debug!("probe task failed: {e}"),
            Ok(None) => break,
            Err(_elapsed) => {
                probes.abort_all();
                hit_deadline = true;
                break;
            }
        }
    }

    // Pass 3: optional fingerprint ports, only against live hosts.
    if !cfg.fingerprint_ports.is_empty() && !hit_deadline {
        hit_deadline = fingerprint_ports(&mut found, cfg, deadline).await;
    }

    (found.into_values().collect(), hit_deadline)
}

/// Returns true when the deadline cut the pass short.
async fn fingerprint_ports(
    found: &mut HashMap<IpAddr, Device>,
    cfg: &Config,
    deadline: tokio::time::Instant,
) -> bool {
    let semaphore = Arc::new(Semaphore::new(cfg.probe_concurrency.max(1)));
    let mut probes: JoinSet<(IpAddr, u16, bool)> = JoinSet::new();

    for addr in found.keys().copied() {
        for port in cfg.fingerprint_ports.iter().copied() {
            let permit_pool = semaphore.clone();
            let probe_timeout = cfg.probe_timeout;
            probes.spawn(async move {
                let Ok(_permit) = permit_pool.acquire_owned().await else {
                    return (addr, port, false);
                };
                (addr, port, probe::port_probe(addr, port, probe_timeout).await)
            });
        }
    }

    loop {
        match tokio::time::timeout_at(deadline, probes.join_next()).await {
            Ok(Some(Ok((addr, port, true)))) => {
                if let Some(device) = found.get_mut(&addr) {
                    device.open_ports.insert(port);
                }
            }
            Ok(Some(_)) => {}
            Ok(None) => return false,
            Err(_elapsed) => {
                probes.abort_all();
                return true;
            }
        }
    }
}

/// The owned, lock-protected device table. Writes are exclusive to
/// discovery refreshes and the disruption engine's blocked flag;
/// everything else reads concurrently.
pub struct DeviceTable {
    inner: RwLock<HashMap<DeviceKey, Device>>,
    last_scan: RwLock<Option<Instant>>,
}

/// Keys that appeared and disappeared in one refresh, for notifications.
#[derive(Debug, Default, Clone)]
pub struct TableDelta {
    pub appeared: Vec<DeviceKey>,
    pub disappeared: Vec<DeviceKey>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            last_scan: RwLock::new(None),
        }
    }

    /// Folds a scan into the table: refreshes sightings, counts misses
    /// for absentees, and expires devices missing from `expiry_misses`
    /// consecutive scans.
    pub fn apply_scan(&self, report: &ScanReport, expiry_misses: u8) -> TableDelta {
        let mut delta = TableDelta::default();
        let mut table = self.inner.write().expect("device table poisoned");

        let mut seen: Vec<DeviceKey> = Vec::with_capacity(report.devices.len());
        for device in &report.devices {
            let existing = table
                .iter_mut()
                .find(|(key, _)| key.matches(&device.key()))
                .map(|(key, dev)| (*key, dev));

            match existing {
                Some((key, dev)) => {
                    dev.merge_sighting(device);
                    dev.last_seen = Instant::now();
                    seen.push(key);
                    // A freshly learned MAC upgrades the identity key.
                    if key.mac.is_none() && dev.mac.is_some() {
                        let upgraded = dev.clone();
                        table.remove(&key);
                        table.insert(upgraded.key(), upgraded);
                        seen.pop();
                        seen.push(device.key());
                    }
                }
                None => {
                    delta.appeared.push(device.key());
                    seen.push(device.key());
                    table.insert(device.key(), device.clone());
                }
            }
        }

        // A partial scan proves nothing about hosts it never probed, so
        // misses only accrue on complete sweeps.
        if !report.partial {
            let mut expired: Vec<DeviceKey> = Vec::new();
            for (key, device) in table.iter_mut() {
                if seen.contains(key) {
                    continue;
                }
                device.missed_scans = device.missed_scans.saturating_add(1);
                if device.missed_scans >= expiry_misses {
                    expired.push(*key);
                }
            }
            for key in expired {
                table.remove(&key);
                delta.disappeared.push(key);
            }
        }

        *self.last_scan.write().expect("device table poisoned") = Some(Instant::now());
        delta
    }

    pub fn list(&self) -> Vec<Device> {
        let table = self.inner.read().expect("device table poisoned");
        let mut devices: Vec<Device> = table.values().cloned().collect();
        devices.sort_by_key(|d| (!d.protected, d.addr));
        devices
    }

    pub fn get(&self, key: &DeviceKey) -> Option<Device> {
        let table = self.inner.read().expect("device table poisoned");
        table
            .iter()
            .find(|(k, _)| k.matches(key))
            .map(|(_, d)| d.clone())
    }

    /// Canonical key for a bare address, once discovery has seen it.
    pub fn resolve(&self, addr: IpAddr) -> Option<DeviceKey> {
        let table = self.inner.read().expect("device table poisoned");
        table.keys().find(|k| k.addr == addr).copied()
    }

    pub fn set_blocked(&self, key: &DeviceKey, blocked: bool) {
        let mut table = self.inner.write().expect("device table poisoned");
        if let Some(device) = table
            .iter_mut()
            .find(|(k, _)| k.matches(key))
            .map(|(_, d)| d)
        {
            device.blocked = blocked;
        }
    }

    pub fn last_scan(&self) -> Option<Instant> {
        *self.last_scan.read().expect("device table poisoned")
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().expect("device table poisoned").is_empty()
    }
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self::new()
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
