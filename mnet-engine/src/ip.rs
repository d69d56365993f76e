//! The bits of IPv4 the engine needs: reading the addresses and length of a packet, and moving
//! the force bit between them.
use std::net::Ipv4Addr;

use bytes::{Bytes, BytesMut};
use pnet::packet::{
    ip::IpNextHeaderProtocols,
    ipv4::{self, Ipv4Packet, MutableIpv4Packet},
};

/// Length of an IPv4 header without options.
pub const MIN_HEADER_LEN: usize = 20;

/// The fields of an IPv4 header the engine routes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    /// Total length of the packet, header included.
    pub len: u16,
}

/// Parses the IPv4 header of `packet`. Returns `None` if it is not a well-formed IPv4 packet.
pub fn parse(packet: &[u8]) -> Option<Header> {
    let ip = Ipv4Packet::new(packet)?;
    if ip.get_version() != 4 || ip.get_header_length() < 5 {
        return None;
    }

    let len = ip.get_total_length();
    if (len as usize) < ip.get_header_length() as usize * 4 || len as usize > packet.len() {
        return None;
    }

    Some(Header { src: ip.get_source(), dst: ip.get_destination(), len })
}

/// Rewrites the addresses of `packet` and recomputes its header checksum.
pub fn rewrite(packet: Bytes, src: Ipv4Addr, dst: Ipv4Addr) -> Bytes {
    let mut buf = BytesMut::from(&packet[..]);
    if let Some(mut ip) = MutableIpv4Packet::new(&mut buf) {
        ip.set_source(src);
        ip.set_destination(dst);
        ip.set_checksum(0);
        let checksum = ipv4::checksum(&ip.to_immutable());
        ip.set_checksum(checksum);
    }

    buf.freeze()
}

/// Builds a UDP-in-IPv4 packet with a zeroed payload of `payload_len` bytes.
pub fn build(src: Ipv4Addr, dst: Ipv4Addr, payload_len: usize) -> Bytes {
    let total = MIN_HEADER_LEN + payload_len;
    let mut buf = BytesMut::zeroed(total);

    if let Some(mut ip) = MutableIpv4Packet::new(&mut buf) {
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_total_length(total.min(u16::MAX as usize) as u16);
        ip.set_ttl(64);
        ip.set_next_level_protocol(IpNextHeaderProtocols::Udp);
        ip.set_source(src);
        ip.set_destination(dst);
        let checksum = ipv4::checksum(&ip.to_immutable());
        ip.set_checksum(checksum);
    }

    buf.freeze()
}
