//! # Interface Enumeration
//!
//! Lists the machine's non-loopback interfaces, classifies each by its
//! name, and derives the IPv4 network (address AND mask) plus the CIDR
//! prefix (mask popcount). Interfaces are re-read from the OS on every
//! discovery run and never treated as persistent state.

use std::fs;
use std::net::Ipv4Addr;

use pnet::datalink::{self, NetworkInterface};
use pnet::ipnetwork::IpNetwork;
use pnet::util::MacAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceKind {
    Ethernet,
    Wireless,
    Virtual,
    Unknown,
}

impl std::fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Ethernet => "ethernet",
            Self::Wireless => "wireless",
            Self::Virtual => "virtual",
            Self::Unknown => "unknown",
        };
        write!(f, "{label}")
    }
}

/// One enumerated local interface with its derived subnet.
#[derive(Debug, Clone)]
pub struct Interface {
    pub name: String,
    pub kind: InterfaceKind,
    pub addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    /// Network address and prefix length, unset when the mask is not a
    /// contiguous run of ones.
    pub network: Option<(Ipv4Addr, u8)>,
    pub mac: Option<MacAddr>,
}

impl Interface {
    /// True when `addr` falls inside this interface's subnet.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        match self.network {
            Some((network, prefix)) => {
                let mask: u32 = prefix_to_mask(prefix);
                (u32::from(addr) & mask) == u32::from(network)
            }
            None => false,
        }
    }
}

/// Enumerates every usable non-loopback interface with an assigned IPv4
/// address. An interface whose mask fails to parse is still reported,
/// classified `Unknown` with `network` unset.
pub fn list_interfaces() -> Vec<Interface> {
    datalink::interfaces()
        .into_iter()
        .filter(|intf| intf.is_up() && !intf.is_loopback())
        .flat_map(|intf| build_interfaces(&intf))
        .collect()
}

fn build_interfaces(intf: &NetworkInterface) -> Vec<Interface> {
    intf.ips
        .iter()
        .filter_map(|net| match net {
            IpNetwork::V4(v4) => Some(from_parts(
                &intf.name,
                intf.mac,
                v4.ip(),
                v4.mask(),
            )),
            IpNetwork::V6(_) => None,
        })
        .collect()
}

/// Builds one [`Interface`] from raw address + mask. Pure so the CIDR
/// derivation is directly testable.
pub fn from_parts(
    name: &str,
    mac: Option<MacAddr>,
    addr: Ipv4Addr,
    netmask: Ipv4Addr,
) -> Interface {
    match derive_network(addr, netmask) {
        Some(network) => Interface {
            name: name.to_string(),
            kind: classify_kind(name),
            addr,
            netmask,
            network: Some(network),
            mac,
        },
        // Unusable mask: report the interface rather than raising, but
        // give it no subnet and no classification to act on.
        None => {
            tracing::debug!(%name, %netmask, "non-contiguous netmask, reporting without CIDR");
            Interface {
                name: name.to_string(),
                kind: InterfaceKind::Unknown,
                addr,
                netmask,
                network: None,
                mac,
            }
        }
    }
}

/// Network address via bitwise AND, prefix via popcount. Returns `None`
/// for masks that are not a contiguous run of leading ones.
pub fn derive_network(addr: Ipv4Addr, netmask: Ipv4Addr) -> Option<(Ipv4Addr, u8)> {
    let mask: u32 = netmask.into();
    let prefix: u8 = mask.count_ones() as u8;
    if mask != prefix_to_mask(prefix) {
        return None;
    }
    let network = Ipv4Addr::from(u32::from(addr) & mask);
    Some((network, prefix))
}

fn prefix_to_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix.min(32))
    }
}

/// Name-pattern classification. Virtual and wireless patterns run first:
/// `veth0` contains `eth` and `wlan0` contains `lan`, so order matters.
pub fn classify_kind(name: &str) -> InterfaceKind {
    let lower = name.to_ascii_lowercase();

    const VIRTUAL: [&str; 8] = ["vpn", "tunnel", "tun", "tap", "virtual", "veth", "virbr", "docker"];
    const WIRELESS: [&str; 3] = ["wifi", "wireless", "wlan"];
    const ETHERNET: [&str; 4] = ["ethernet", "eth", "lan", "wired"];

    if VIRTUAL.iter().any(|p| lower.contains(p)) || lower.starts_with("br-") {
        return InterfaceKind::Virtual;
    }
    if WIRELESS.iter().any(|p| lower.contains(p)) || lower.starts_with("wl") {
        return InterfaceKind::Wireless;
    }
    if ETHERNET.iter().any(|p| lower.contains(p)) || lower.starts_with("en") {
        return InterfaceKind::Ethernet;
    }
    InterfaceKind::Unknown
}

/// Default gateway for the segment. Reads the kernel routing table on
/// Linux; elsewhere falls back to the first host of the subnet, which is
/// where consumer routers live in practice.
pub fn default_gateway(intf: &Interface) -> Option<Ipv4Addr> {
    if let Some(gw) = linux_route_gateway() {
        if intf.contains(gw) {
            return Some(gw);
        }
    }
    let (network, prefix) = intf.network?;
    if prefix >= 31 {
        return None;
    }
    Some(Ipv4Addr::from(u32::from(network).saturating_add(1)))
}

fn linux_route_gateway() -> Option<Ipv4Addr> {
    let table = fs::read_to_string("/proc/net/route").ok()?;
    for line in table.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // destination 0.0.0.0 with the RTF_GATEWAY flag set
        if fields.len() >= 4 && fields[1] == "00000000" {
            let flags = u16::from_str_radix(fields[3], 16).ok()?;
            if flags & 0x2 != 0 {
                let raw = u32::from_str_radix(fields[2], 16).ok()?;
                return Some(Ipv4Addr::from(raw.swap_bytes()));
            }
        }
    }
    None
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

    #[test]
    fn network_and_cidr_match_manual_bitwise_math() {
        let (network, prefix) =
            derive_network(Ipv4Addr::new(192, 168, 1, 50), Ipv4Addr::new(255, 255, 255, 0))
                .expect("contiguous mask");
        assert_eq!(network, Ipv4Addr::new(192, 168, 1, 0));
        assert_eq!(prefix, 24);
    }

    #[test]
    fn derivation_holds_for_every_valid_prefix() {
        // Deterministic pseudo-random addresses, one per prefix length.
        let mut seed: u32 = 0x9e37_79b9;
        for prefix in 0u8..=32 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let addr = Ipv4Addr::from(seed);
            let mask = Ipv4Addr::from(prefix_to_mask(prefix));

            let (network, derived) = derive_network(addr, mask).expect("valid mask");
            assert_eq!(derived, prefix);
            assert_eq!(u32::from(network), u32::from(addr) & prefix_to_mask(prefix));
        }
    }

    #[test]
    fn non_contiguous_mask_reports_unknown_without_cidr() {
        let intf = from_parts(
            "eth0",
            None,
            Ipv4Addr::new(10, 0, 0, 5),
            Ipv4Addr::new(255, 0, 255, 0),
        );
        assert_eq!(intf.kind, InterfaceKind::Unknown);
        assert!(intf.network.is_none());
    }

    #[test]
    fn classification_orders_virtual_and_wireless_before_ethernet() {
        assert_eq!(classify_kind("eth0"), InterfaceKind::Ethernet);
        assert_eq!(classify_kind("enp3s0"), InterfaceKind::Ethernet);
        assert_eq!(classify_kind("Local Area Connection"), InterfaceKind::Ethernet);
        assert_eq!(classify_kind("wlan0"), InterfaceKind::Wireless);
        assert_eq!(classify_kind("Wi-Fi"), InterfaceKind::Wireless);
        assert_eq!(classify_kind("wlp2s0"), InterfaceKind::Wireless);
        assert_eq!(classify_kind("tun0"), InterfaceKind::Virtual);
        assert_eq!(classify_kind("veth1a2b"), InterfaceKind::Virtual);
        assert_eq!(classify_kind("docker0"), InterfaceKind::Virtual);
        assert_eq!(classify_kind("br-9f2c"), InterfaceKind::Virtual);
        assert_eq!(classify_kind("ppp0"), InterfaceKind::Unknown);
    }

    #[test]
    fn interface_contains_respects_the_derived_subnet() {
        let intf = from_parts(
            "eth0",
            None,
            Ipv4Addr::new(192, 168, 1, 50),
            Ipv4Addr::new(255, 255, 255, 0),
        );
        assert!(intf.contains(Ipv4Addr::new(192, 168, 1, 200)));
        assert!(!intf.contains(Ipv4Addr::new(192, 168, 2, 200)));
    }

    #[test]
    fn gateway_falls_back_to_first_host_of_subnet() {
        let intf = from_parts(
            "fake0",
            None,
            Ipv4Addr::new(172, 16, 4, 9),
            Ipv4Addr::new(255, 255, 255, 0),
        );
        // The routing-table gateway (if any) belongs to a real interface,
        // never to this fake subnet, so the fallback applies.
        assert_eq!(default_gateway(&intf), Some(Ipv4Addr::new(172, 16, 4, 1)));
    }
}
