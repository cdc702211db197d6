//! UDP datagram construction for transport-flood interference.

use std::net::Ipv4Addr;

use pnet::packet::udp::{self, MutableUdpPacket, UdpPacket};
use rand::Rng;

use crate::{PacketError, UDP_HDR_LEN};

/// Ports a junk flood cycles through: game traffic and the services a
/// console keeps open. 3074 is Xbox Live, 3478-3480 are PSN/STUN, 9295
/// is PS Remote Play.
pub const FLOOD_PORTS: [u16; 8] = [53, 123, 3074, 3478, 3479, 3480, 5353, 9295];

/// A datagram of `payload_len` random bytes for the `src -> dst` flow.
pub fn junk_datagram(
    src: Ipv4Addr,
    src_port: u16,
    dst: Ipv4Addr,
    dst_port: u16,
    payload_len: usize,
) -> Result<Vec<u8>, PacketError> {
    let mut payload = vec![0u8; payload_len];
    rand::rng().fill(payload.as_mut_slice());
    datagram(src, src_port, dst, dst_port, &payload)
}

/// A datagram carrying the given payload, checksummed for `src -> dst`.
pub fn datagram(
    src: Ipv4Addr,
    src_port: u16,
    dst: Ipv4Addr,
    dst_port: u16,
    payload: &[u8],
) -> Result<Vec<u8>, PacketError> {
    let total = UDP_HDR_LEN + payload.len();
    let mut buffer = vec![0u8; total];
    buffer[UDP_HDR_LEN..].copy_from_slice(payload);

    let mut pkt = MutableUdpPacket::new(&mut buffer).ok_or(PacketError::Buffer("udp"))?;
    pkt.set_source(src_port);
    pkt.set_destination(dst_port);
    pkt.set_length(total as u16);

    let sum = udp::ipv4_checksum(
        &UdpPacket::new(&buffer).ok_or(PacketError::Buffer("udp"))?,
        &src,
        &dst,
    );
    let mut pkt = MutableUdpPacket::new(&mut buffer).ok_or(PacketError::Buffer("udp"))?;
    pkt.set_checksum(sum);

    Ok(buffer)
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
    fn junk_datagram_has_consistent_length_and_checksum() {
        let src = Ipv4Addr::new(192, 168, 1, 1);
        let dst = Ipv4Addr::new(192, 168, 1, 50);
        let bytes = junk_datagram(src, 40_000, dst, 3074, 64).unwrap();

        assert_eq!(bytes.len(), UDP_HDR_LEN + 64);
        let pkt = UdpPacket::new(&bytes).unwrap();
        assert_eq!(pkt.get_length() as usize, bytes.len());
        assert_eq!(pkt.get_destination(), 3074);
        assert_eq!(pkt.get_checksum(), udp::ipv4_checksum(&pkt, &src, &dst));
    }
}
