pub mod disrupt;
pub mod health;
pub mod interfaces;
pub mod scan;

use std::net::IpAddr;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sever")]
#[command(about = "LAN device discovery and selective disruption.")]
pub struct CommandLine {
    #[command(subcommand)]
    pub command: Commands,

    /// Skip reverse-hostname lookups during discovery.
    #[arg(long, global = true)]
    pub no_dns: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List local interfaces with their derived subnets
    #[command(alias = "i")]
    Interfaces,
    /// Discover devices on the local segments
    #[command(alias = "s")]
    Scan {
        /// Per-probe timeout in milliseconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Health report for one device
    #[command(alias = "h")]
    Health { target: IpAddr },
    /// Disrupt one device until interrupted
    #[command(alias = "d")]
    Disrupt {
        target: IpAddr,
        /// Comma-separated method list (arp, icmp, tcp, udp, dns, rules);
        /// all eligible methods when omitted
        #[arg(long, value_delimiter = ',')]
        methods: Vec<String>,
        /// Stop automatically after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Remove any blocking rules left behind for a device
    Release { target: IpAddr },
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
