//! The disruption method catalogue.

use std::str::FromStr;
use std::time::Duration;

/// One independently toggle-able disruption technique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisruptMethod {
    /// Address-resolution interference: forged ARP replies misdirecting
    /// the target's traffic.
    ArpSpoof,
    /// Echo-protocol disruption: unreachable / time-exceeded / redirect
    /// messages at the target.
    IcmpDisrupt,
    /// Stream-reset injection against well-known application ports.
    TcpReset,
    /// Junk datagrams saturating the target's well-known ports.
    UdpFlood,
    /// Name-resolution interference: resolver-table override plus forged
    /// answers.
    DnsOverride,
    /// Firewall / route / address-table blocking via the rule
    /// orchestrator.
    RuleBlock,
}

impl DisruptMethod {
    pub const ALL: [DisruptMethod; 6] = [
        Self::ArpSpoof,
        Self::IcmpDisrupt,
        Self::TcpReset,
        Self::UdpFlood,
        Self::DnsOverride,
        Self::RuleBlock,
    ];

    /// Raw frame injection and OS-table mutation need elevation; the
    /// socket-based reset and flood forms do not.
    pub fn requires_elevation(&self) -> bool {
        !matches!(self, Self::TcpReset | Self::UdpFlood)
    }

    /// Pause between a worker's bursts.
    pub fn interval(&self) -> Duration {
        match self {
            Self::ArpSpoof => Duration::from_millis(500),
            Self::IcmpDisrupt => Duration::from_millis(200),
            Self::TcpReset => Duration::from_millis(250),
            Self::UdpFlood => Duration::from_millis(50),
            Self::DnsOverride => Duration::from_millis(1_000),
            // Rules are static; the keeper only wakes to stay joinable.
            Self::RuleBlock => Duration::from_millis(500),
        }
    }

    /// Stable order for display.
    pub fn ordinal(&self) -> u8 {
        Self::ALL.iter().position(|m| m == self).unwrap_or(u8::MAX as usize) as u8
    }
}

impl std::fmt::Display for DisruptMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ArpSpoof => "arp-spoof",
            Self::IcmpDisrupt => "icmp-disrupt",
            Self::TcpReset => "tcp-reset",
            Self::UdpFlood => "udp-flood",
            Self::DnsOverride => "dns-override",
            Self::RuleBlock => "rule-block",
        };
        write!(f, "{name}")
    }
}

impl FromStr for DisruptMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "arp-spoof" | "arp" => Ok(Self::ArpSpoof),
            "icmp-disrupt" | "icmp" => Ok(Self::IcmpDisrupt),
            "tcp-reset" | "tcp" => Ok(Self::TcpReset),
            "udp-flood" | "udp" => Ok(Self::UdpFlood),
            "dns-override" | "dns" => Ok(Self::DnsOverride),
            "rule-block" | "rules" => Ok(Self::RuleBlock),
            other => Err(format!("unknown disruption method: {other}")),
        }
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
