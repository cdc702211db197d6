//! # Device Model
//!
//! The unified record discovery builds for every live host, plus the
//! identity key the health monitor and disruption engine address it by.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::time::Instant;

use pnet::util::MacAddr;

/// Identity of a device: address plus hardware address when both are
/// known, address alone otherwise. `matches` implements that composite
/// semantic; full equality (derived) is what the keyed tables use after
/// discovery has canonicalized the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceKey {
    pub addr: IpAddr,
    pub mac: Option<MacAddr>,
}

impl DeviceKey {
    pub fn from_addr(addr: IpAddr) -> Self {
        Self { addr, mac: None }
    }

    pub fn with_mac(addr: IpAddr, mac: MacAddr) -> Self {
        Self { addr, mac: Some(mac) }
    }

    /// Identity comparison per the data model: the hardware address only
    /// participates when both sides know it.
    pub fn matches(&self, other: &DeviceKey) -> bool {
        if self.addr != other.addr {
            return false;
        }
        match (self.mac, other.mac) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl std::fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.mac {
            Some(mac) => write!(f, "{} ({mac})", self.addr),
            None => write!(f, "{}", self.addr),
        }
    }
}

/// Best-guess classification, derived from vendor and hostname.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceType {
    Router,
    Computer,
    Phone,
    GamingConsole,
    Printer,
    #[default]
    Unknown,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Router => "router",
            Self::Computer => "computer",
            Self::Phone => "phone",
            Self::GamingConsole => "gaming console",
            Self::Printer => "printer",
            Self::Unknown => "unknown",
        };
        write!(f, "{label}")
    }
}

/// One discovered host. Created by discovery, enriched by the identity
/// resolver, mutated only by discovery (refresh) and the disruption
/// engine (blocked flag).
#[derive(Debug, Clone)]
pub struct Device {
    pub addr: IpAddr,
    pub mac: Option<MacAddr>,
    pub hostname: Option<String>,
    pub vendor: Option<String>,
    pub device_type: DeviceType,
    /// Name of the interface the device was seen on.
    pub interface: String,
    pub open_ports: BTreeSet<u16>,
    pub first_seen: Instant,
    pub last_seen: Instant,
    /// Consecutive scans the device has been absent from.
    pub missed_scans: u8,
    pub blocked: bool,
    /// Marks the gateway and the scanning host itself; such devices are
    /// refused as disruption targets.
    pub protected: bool,
}

impl Device {
    pub fn new(addr: IpAddr, interface: &str) -> Self {
        let now = Instant::now();
        Self {
            addr,
            mac: None,
            hostname: None,
            vendor: None,
            device_type: DeviceType::Unknown,
            interface: interface.to_string(),
            open_ports: BTreeSet::new(),
            first_seen: now,
            last_seen: now,
            missed_scans: 0,
            blocked: false,
            protected: false,
        }
    }

    pub fn with_mac(mut self, mac: MacAddr) -> Self {
        self.mac = Some(mac);
        self
    }

    pub fn key(&self) -> DeviceKey {
        DeviceKey {
            addr: self.addr,
            mac: self.mac,
        }
    }

    /// Folds a sighting of the same device (possibly from another
    /// interface) into this record. ARP-table derived hardware addresses
    /// are authoritative, so an incoming MAC only fills a gap and never
    /// overwrites one already learned.
    pub fn merge_sighting(&mut self, other: &Device) {
        if self.mac.is_none() {
            self.mac = other.mac;
        }
        if self.hostname.is_none() {
            self.hostname = other.hostname.clone();
        }
        if self.vendor.is_none() {
            self.vendor = other.vendor.clone();
        }
        if self.device_type == DeviceType::Unknown {
            self.device_type = other.device_type;
        }
        self.open_ports.extend(other.open_ports.iter().copied());
        self.protected |= other.protected;
        self.last_seen = self.last_seen.max(other.last_seen);
        self.missed_scans = 0;
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
    }

    #[test]
    fn key_matching_uses_mac_only_when_both_sides_know_it() {
        let mac = MacAddr::new(0xaa, 0xbb, 0xcc, 0, 0, 1);
        let other_mac = MacAddr::new(0xaa, 0xbb, 0xcc, 0, 0, 2);

        let bare = DeviceKey::from_addr(addr(5));
        let full = DeviceKey::with_mac(addr(5), mac);
        let conflicting = DeviceKey::with_mac(addr(5), other_mac);

        assert!(bare.matches(&full));
        assert!(full.matches(&bare));
        assert!(!full.matches(&conflicting));
        assert!(!bare.matches(&DeviceKey::from_addr(addr(6))));
    }

    #[test]
    fn merge_keeps_authoritative_mac_and_unions_ports() {
        let mut seen = Device::new(addr(9), "eth0")
            .with_mac(MacAddr::new(1, 2, 3, 4, 5, 6));
        seen.open_ports.insert(80);

        let mut again = Device::new(addr(9), "wlan0")
            .with_mac(MacAddr::new(9, 9, 9, 9, 9, 9));
        again.open_ports.insert(443);
        again.vendor = Some("Acme".to_string());

        seen.merge_sighting(&again);

        assert_eq!(seen.mac, Some(MacAddr::new(1, 2, 3, 4, 5, 6)));
        assert_eq!(seen.vendor.as_deref(), Some("Acme"));
        assert!(seen.open_ports.contains(&80) && seen.open_ports.contains(&443));
        assert_eq!(seen.missed_scans, 0);
    }
}
