//! OS address-resolution table reads.
//!
//! An ARP entry means the kernel has exchanged frames with that host
//! recently, so these are the cheap, near-instant discovery hits — and
//! their hardware addresses are authoritative over anything a probe
//! guesses later.

#[cfg(target_os = "linux")]
use std::fs;
use std::net::Ipv4Addr;
use std::process::Command;

use pnet::util::MacAddr;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
    pub addr: Ipv4Addr,
    pub mac: MacAddr,
    pub interface: String,
}

/// Reads the system's current neighbour table. Returns an empty list
/// rather than an error when the table cannot be read; discovery treats
/// that as "no cheap hits" and falls through to probing.
pub fn read_neighbor_table() -> Vec<NeighborEntry> {
    #[cfg(target_os = "linux")]
    {
        match fs::read_to_string("/proc/net/arp") {
            Ok(table) => return parse_proc_arp(&table),
            Err(e) => debug!("could not read /proc/net/arp: {e}"),
        }
    }

    match Command::new("arp").arg("-a").output() {
        Ok(output) => parse_arp_a(&String::from_utf8_lossy(&output.stdout)),
        Err(e) => {
            debug!("arp -a failed: {e}");
            Vec::new()
        }
    }
}

/// `/proc/net/arp` format: `IP  HWtype  Flags  HWaddress  Mask  Device`.
/// Entries with flags 0x0 are incomplete and skipped.
fn parse_proc_arp(table: &str) -> Vec<NeighborEntry> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 6 {
                return None;
            }
            let flags = u8::from_str_radix(fields[2].trim_start_matches("0x"), 16).ok()?;
            if flags == 0 {
                return None;
            }
            let addr: Ipv4Addr = fields[0].parse().ok()?;
            let mac: MacAddr = fields[3].parse().ok()?;
            if mac == MacAddr::zero() {
                return None;
            }
            Some(NeighborEntry {
                addr,
                mac,
                interface: fields[5].to_string(),
            })
        })
        .collect()
}

/// BSD-style `arp -a` lines: `host (192.168.1.1) at aa:bb:cc:dd:ee:ff on en0 ...`
fn parse_arp_a(output: &str) -> Vec<NeighborEntry> {
    output
        .lines()
        .filter_map(|line| {
            let addr_str = line.split('(').nth(1)?.split(')').next()?;
            let addr: Ipv4Addr = addr_str.parse().ok()?;
            let mut rest = line.split_whitespace().skip_while(|w| *w != "at").skip(1);
            let mac: MacAddr = rest.next()?.parse().ok()?;
            let interface = line
                .split_whitespace()
                .skip_while(|w| *w != "on")
                .nth(1)
                .unwrap_or_default()
                .to_string();
            Some(NeighborEntry { addr, mac, interface })
        })
        .collect()
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
    fn proc_arp_skips_header_and_incomplete_entries() {
        let table = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.1.1      0x1         0x2         a4:2b:b0:aa:bb:cc     *        eth0
192.168.1.40     0x1         0x0         00:00:00:00:00:00     *        eth0
192.168.1.50     0x1         0x2         b4:0a:d8:11:22:33     *        wlan0
";
        let entries = parse_proc_arp(table);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].addr, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(entries[0].interface, "eth0");
        assert_eq!(entries[1].mac, "b4:0a:d8:11:22:33".parse::<MacAddr>().unwrap());
    }

    #[test]
    fn arp_a_parses_bsd_style_lines() {
        let output = "\
router.lan (192.168.1.1) at a4:2b:b0:aa:bb:cc on en0 ifscope [ethernet]
? (192.168.1.77) at (incomplete) on en0 ifscope [ethernet]
ps5.lan (192.168.1.50) at b4:0a:d8:11:22:33 on en0 ifscope [ethernet]
";
        let entries = parse_arp_a(output);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].addr, Ipv4Addr::new(192, 168, 1, 50));
        assert_eq!(entries[1].interface, "en0");
    }
}
