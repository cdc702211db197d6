//! # Device Identity Resolution
//!
//! Enriches discovered devices with vendor names (OUI database), reverse
//! hostnames (PTR query against the system resolver) and a best-guess
//! device type. Everything here is best-effort: a device that resolves
//! nothing keeps its typed `None`s.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use rand::Rng;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use sever_common::config::Config;
use sever_common::network::device::Device;
use sever_common::network::vendor;
use sever_protocols::dns;

const PTR_TIMEOUT: Duration = Duration::from_millis(300);

/// Enriches every device in place. `gateway` marks the router (which is
/// also flagged protected so the engine refuses to target it).
pub async fn enrich(devices: &mut [Device], cfg: &Config, gateway: Option<Ipv4Addr>) {
    let resolver = if cfg.no_dns { None } else { system_resolver() };

    for device in devices.iter_mut() {
        if let Some(mac) = device.mac {
            if device.vendor.is_none() {
                device.vendor = vendor::get_vendor(mac);
            }
        }

        if device.hostname.is_none() {
            if let Some(resolver) = resolver {
                device.hostname = resolve_hostname(device.addr, resolver).await;
            }
        }

        let is_gateway = matches!((device.addr, gateway), (IpAddr::V4(a), Some(gw)) if a == gw);
        if is_gateway {
            device.protected = true;
        }
        device.device_type = vendor::guess_device_type(
            device.vendor.as_deref(),
            device.hostname.as_deref(),
            is_gateway,
        );
    }
}

/// Reverse PTR lookup via one UDP round-trip to the system resolver.
pub async fn resolve_hostname(addr: IpAddr, resolver: Ipv4Addr) -> Option<String> {
    let id: u16 = rand::rng().random();
    let query = dns::ptr_query(&addr, id);

    let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    let resolver_addr = SocketAddr::new(IpAddr::V4(resolver), 53);
    socket.send_to(&query, resolver_addr).await.ok()?;

    let mut buffer = [0u8; 512];
    let received = timeout(PTR_TIMEOUT, socket.recv_from(&mut buffer)).await;
    match received {
        Ok(Ok((len, _peer))) => dns::parse_ptr_response(&buffer[..len], id),
        _ => {
            debug!(%addr, "PTR lookup timed out");
            None
        }
    }
}

/// First nameserver from `/etc/resolv.conf`, if the file exists and
/// names an IPv4 resolver.
pub fn system_resolver() -> Option<Ipv4Addr> {
    let contents = fs::read_to_string("/etc/resolv.conf").ok()?;
    parse_resolv_conf(&contents)
}

fn parse_resolv_conf(contents: &str) -> Option<Ipv4Addr> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let rest = line.strip_prefix("nameserver")?.trim();
            rest.parse::<Ipv4Addr>().ok()
        })
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
    use sever_common::network::device::DeviceType;

    #[test]
    fn resolv_conf_parsing_skips_comments_and_ipv6() {
        let conf = "\
# generated by resolvconf
nameserver fe80::1
nameserver 192.168.1.1
options edns0
";
        assert_eq!(parse_resolv_conf(conf), Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(parse_resolv_conf("options edns0\n"), None);
    }

    #[tokio::test]
    async fn enrich_marks_the_gateway_protected_and_typed() {
        let gateway = Ipv4Addr::new(192, 168, 1, 1);
        let mut devices = vec![Device::new(IpAddr::V4(gateway), "eth0")];
        let cfg = Config {
            no_dns: true,
            ..Config::default()
        };

        enrich(&mut devices, &cfg, Some(gateway)).await;

        assert!(devices[0].protected);
        assert_eq!(devices[0].device_type, DeviceType::Router);
    }
}
