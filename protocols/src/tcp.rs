//! TCP segment construction for stream-reset injection.

use std::net::Ipv4Addr;

use pnet::packet::tcp::{self, MutableTcpPacket, TcpFlags, TcpPacket};

use crate::{PacketError, TCP_HDR_LEN};

/// Application ports reset injection cycles through. Mirrors the set of
/// services a consumer device actually keeps connections open on.
pub const WELL_KNOWN_PORTS: [u16; 12] =
    [80, 443, 22, 21, 25, 53, 110, 143, 993, 995, 8080, 8443];

/// Bare RST segment for the `src -> dst` flow. Sequence number is the
/// caller's guess; receivers accept any in-window value.
pub fn reset_segment(
    src: Ipv4Addr,
    src_port: u16,
    dst: Ipv4Addr,
    dst_port: u16,
    seq: u32,
) -> Result<Vec<u8>, PacketError> {
    let mut buffer = vec![0u8; TCP_HDR_LEN];
    let mut pkt = MutableTcpPacket::new(&mut buffer).ok_or(PacketError::Buffer("tcp"))?;
    pkt.set_source(src_port);
    pkt.set_destination(dst_port);
    pkt.set_sequence(seq);
    pkt.set_acknowledgement(0);
    pkt.set_data_offset((TCP_HDR_LEN / 4) as u8);
    pkt.set_flags(TcpFlags::RST);
    pkt.set_window(0);
    pkt.set_urgent_ptr(0);

    let sum = tcp::ipv4_checksum(
        &TcpPacket::new(&buffer).ok_or(PacketError::Buffer("tcp"))?,
        &src,
        &dst,
    );
    let mut pkt = MutableTcpPacket::new(&mut buffer).ok_or(PacketError::Buffer("tcp"))?;
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
    fn reset_segment_sets_rst_and_valid_checksum() {
        let src = Ipv4Addr::new(192, 168, 1, 1);
        let dst = Ipv4Addr::new(192, 168, 1, 50);
        let bytes = reset_segment(src, 443, dst, 50_000, 0xdead_beef).unwrap();

        let pkt = TcpPacket::new(&bytes).unwrap();
        assert_eq!(pkt.get_flags() & TcpFlags::RST, TcpFlags::RST);
        assert_eq!(pkt.get_source(), 443);
        assert_eq!(pkt.get_destination(), 50_000);
        assert_eq!(pkt.get_sequence(), 0xdead_beef);
        assert_eq!(pkt.get_checksum(), tcp::ipv4_checksum(&pkt, &src, &dst));
    }
}
