//! ICMP control-message construction.
//!
//! These carry no IP header; a Layer4 transport channel prepends it on
//! send. Each message embeds a synthetic IPv4 header naming the traffic
//! it pretends to be reporting on, per RFC 792.

use std::net::Ipv4Addr;

use pnet::packet::Packet;
use pnet::packet::icmp::{self, IcmpCode, IcmpPacket, IcmpTypes, MutableIcmpPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{self, MutableIpv4Packet};

use crate::{ICMP_HDR_LEN, IPV4_HDR_LEN, PacketError};

/// Bytes of original datagram echoed back inside an ICMP error.
const EMBED_LEN: usize = IPV4_HDR_LEN + 8;

/// Host-unreachable (type 3 code 1) naming traffic from `target` to
/// `peer`.
pub fn destination_unreachable(target: Ipv4Addr, peer: Ipv4Addr) -> Result<Vec<u8>, PacketError> {
    build_error(IcmpTypes::DestinationUnreachable, IcmpCode(1), [0u8; 4], target, peer)
}

/// TTL-expired-in-transit (type 11 code 0).
pub fn time_exceeded(target: Ipv4Addr, peer: Ipv4Addr) -> Result<Vec<u8>, PacketError> {
    build_error(IcmpTypes::TimeExceeded, IcmpCode(0), [0u8; 4], target, peer)
}

/// Host redirect (type 5 code 1) steering the target's route for `peer`
/// toward `new_gateway`.
pub fn redirect(
    target: Ipv4Addr,
    peer: Ipv4Addr,
    new_gateway: Ipv4Addr,
) -> Result<Vec<u8>, PacketError> {
    build_error(IcmpTypes::RedirectMessage, IcmpCode(1), new_gateway.octets(), target, peer)
}

/// Assembles header + embedded original datagram. The four bytes after
/// the checksum are unused for unreachable/time-exceeded and hold the
/// gateway address for redirects.
fn build_error(
    icmp_type: icmp::IcmpType,
    code: IcmpCode,
    second_word: [u8; 4],
    original_src: Ipv4Addr,
    original_dst: Ipv4Addr,
) -> Result<Vec<u8>, PacketError> {
    let mut buffer = vec![0u8; ICMP_HDR_LEN + EMBED_LEN];

    embed_original(&mut buffer[ICMP_HDR_LEN..], original_src, original_dst)?;

    let mut pkt = MutableIcmpPacket::new(&mut buffer).ok_or(PacketError::Buffer("icmp"))?;
    pkt.set_icmp_type(icmp_type);
    pkt.set_icmp_code(code);

    // pnet's generic ICMP view puts everything after the checksum in the
    // payload, so the second header word is the payload's first four
    // bytes.
    buffer[4..8].copy_from_slice(&second_word);

    let mut pkt = MutableIcmpPacket::new(&mut buffer).ok_or(PacketError::Buffer("icmp"))?;
    pkt.set_checksum(0);
    let sum = icmp::checksum(&IcmpPacket::new(pkt.packet()).ok_or(PacketError::Buffer("icmp"))?);
    pkt.set_checksum(sum);

    Ok(buffer)
}

fn embed_original(buffer: &mut [u8], src: Ipv4Addr, dst: Ipv4Addr) -> Result<(), PacketError> {
    let mut ip =
        MutableIpv4Packet::new(&mut buffer[..EMBED_LEN]).ok_or(PacketError::Buffer("ipv4"))?;
    ip.set_version(4);
    ip.set_header_length((IPV4_HDR_LEN / 4) as u8);
    ip.set_total_length(EMBED_LEN as u16);
    ip.set_ttl(64);
    ip.set_next_level_protocol(IpNextHeaderProtocols::Udp);
    ip.set_source(src);
    ip.set_destination(dst);
    let sum = ipv4::checksum(&ip.to_immutable());
    ip.set_checksum(sum);
    Ok(())
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
