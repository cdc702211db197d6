//! Raw packet construction for the disruption engine and discovery.
//!
//! Builders return finished byte buffers: ARP frames carry their own
//! Ethernet header and go out a datalink channel; ICMP/TCP/UDP packets
//! are headerless at the IP layer and go out a Layer4 transport channel,
//! which prepends the IP header. DNS messages are plain UDP payloads.

use thiserror::Error;

pub mod arp;
pub mod dns;
pub mod icmp;
pub mod tcp;
pub mod udp;

pub const ETH_HDR_LEN: usize = 14;
pub const ARP_LEN: usize = 28;
pub const IPV4_HDR_LEN: usize = 20;
pub const ICMP_HDR_LEN: usize = 8;
pub const TCP_HDR_LEN: usize = 20;
pub const UDP_HDR_LEN: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("buffer too small for {0} packet")]
    Buffer(&'static str),
}
