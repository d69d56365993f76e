//! Datagrams exchanged between cooperating emulator cores.
//!
//! Every datagram starts with an 8 byte header followed by one or more fixed-size remote
//! descriptors. Digest datagrams carry only descriptors (the payloads stay cached at their home
//! cores); tunnel datagrams carry exactly one descriptor followed by the packet payload.
//!
//! ```text
//!  0       1       2               4               6               8
//!  +-------+-------+---------------+---------------+---------------+
//!  | 0x4d  | kind  |     count     |    length     |   checksum    |
//!  +-------+-------+---------------+---------------+---------------+
//!  | descriptor 0 (40 bytes)                                       |
//!  | ...                                                           |
//!  | payload (tunnel only)                                         |
//!  +---------------------------------------------------------------+
//! ```
use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{checksum, CodecError, Error};
use mnet_common::{
    constants::{MTU, UDP_IP_HEADER_LEN},
    Tick,
};

/// The ID of the remote forwarding codec on the wire.
const WIRE_ID: u8 = 0x4d;

const KIND_DIGEST: u8 = 0;
const KIND_TUNNEL: u8 = 1;

/// Offset of the checksum field inside the header.
const CHECKSUM_OFFSET: usize = 6;

/// Length of the datagram header.
pub const HEADER_LEN: usize = 8;
/// Length of a single encoded [`RemoteDescriptor`].
pub const DESCRIPTOR_LEN: usize = 40;
/// Largest digest datagram, sized to fit one MTU after the IPv4 and UDP headers.
pub const MAX_DIGEST_LEN: usize = MTU - UDP_IP_HEADER_LEN;
/// Number of descriptors that fit in a single digest datagram.
pub const MAX_DIGEST_DESCRIPTORS: usize = (MAX_DIGEST_LEN - HEADER_LEN) / DESCRIPTOR_LEN;
/// Largest tunnel datagram. Tunnels carry whole IP packets and may exceed the MTU.
pub const MAX_TUNNEL_LEN: usize = u16::MAX as usize;

/// The control state of a packet travelling between emulator cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteDescriptor {
    /// Pending cache handle at the home core. Zero when the payload is not cached.
    pub handle: u64,
    /// Tick after which the home core discards the cached payload.
    pub expire: Tick,
    /// Length of the packet in bytes.
    pub len: u32,
    /// Accumulated emulated wait in ticks.
    pub wait: u32,
    /// Virtual origin address.
    pub src: Ipv4Addr,
    /// Virtual destination address.
    pub dst: Ipv4Addr,
    /// Index of the hop the receiving core has to emulate next.
    pub hop: u32,
    /// Remaining core traversals before the packet is dropped.
    pub ttl: i8,
}

impl RemoteDescriptor {
    /// Returns `true` if the payload of this packet is cached at its home core.
    #[inline]
    pub const fn is_cached(&self) -> bool {
        self.handle != 0
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_i8(self.ttl);
        dst.put_bytes(0, 3);
        dst.put_u64(self.handle);
        dst.put_u64(self.expire);
        dst.put_u32(self.len);
        dst.put_u32(self.wait);
        dst.put_u32(self.src.into());
        dst.put_u32(self.dst.into());
        dst.put_u32(self.hop);
    }

    fn decode(src: &mut Bytes) -> Self {
        let ttl = src.get_i8();
        src.advance(3);

        Self {
            ttl,
            handle: src.get_u64(),
            expire: src.get_u64(),
            len: src.get_u32(),
            wait: src.get_u32(),
            src: Ipv4Addr::from(src.get_u32()),
            dst: Ipv4Addr::from(src.get_u32()),
            hop: src.get_u32(),
        }
    }
}

/// A single datagram on the remote channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    /// One or more descriptors of packets whose payload is cached at home.
    Digest(Vec<RemoteDescriptor>),
    /// A descriptor together with the payload of the packet.
    Tunnel { descriptor: RemoteDescriptor, payload: Bytes },
}

impl Datagram {
    /// Returns the number of bytes this datagram occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Digest(descriptors) => HEADER_LEN + descriptors.len() * DESCRIPTOR_LEN,
            Self::Tunnel { payload, .. } => HEADER_LEN + DESCRIPTOR_LEN + payload.len(),
        }
    }

    /// Returns the number of descriptors carried by this datagram.
    pub fn descriptor_count(&self) -> usize {
        match self {
            Self::Digest(descriptors) => descriptors.len(),
            Self::Tunnel { .. } => 1,
        }
    }

    /// Consumes the datagram and returns every descriptor with the payload it carries.
    pub fn into_descriptors(self) -> Vec<(RemoteDescriptor, Option<Bytes>)> {
        match self {
            Self::Digest(descriptors) => descriptors.into_iter().map(|d| (d, None)).collect(),
            Self::Tunnel { descriptor, payload } => vec![(descriptor, Some(payload))],
        }
    }

    /// Encodes the datagram, filling in its length and checksum.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), Error> {
        let len = self.encoded_len();
        let (kind, count) = match self {
            Self::Digest(descriptors) => {
                if descriptors.is_empty() || descriptors.len() > MAX_DIGEST_DESCRIPTORS {
                    return Err(Error::Count(descriptors.len()));
                }
                (KIND_DIGEST, descriptors.len())
            }
            Self::Tunnel { .. } => {
                if len > MAX_TUNNEL_LEN {
                    return Err(Error::TooLarge(len));
                }
                (KIND_TUNNEL, 1)
            }
        };

        dst.reserve(len);
        let start = dst.len();

        dst.put_u8(WIRE_ID);
        dst.put_u8(kind);
        dst.put_u16(count as u16);
        dst.put_u16(len as u16);
        dst.put_u16(0);

        match self {
            Self::Digest(descriptors) => descriptors.iter().for_each(|d| d.encode(dst)),
            Self::Tunnel { descriptor, payload } => {
                descriptor.encode(dst);
                dst.put_slice(payload);
            }
        }

        let csum = checksum::internet_checksum(&dst[start..]);
        dst[start + CHECKSUM_OFFSET..start + CHECKSUM_OFFSET + 2]
            .copy_from_slice(&csum.to_be_bytes());

        Ok(())
    }

    /// Decodes and validates a complete datagram.
    pub fn decode(mut src: Bytes) -> Result<Self, Error> {
        if src.len() < HEADER_LEN {
            return Err(Error::Truncated { what: "header", need: HEADER_LEN, have: src.len() });
        }

        if !checksum::verify(&src) {
            let mut scratch = src.to_vec();
            let expected = u16::from_be_bytes([
                scratch[CHECKSUM_OFFSET],
                scratch[CHECKSUM_OFFSET + 1],
            ]);
            scratch[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].fill(0);

            // A header that is wrong in other ways is more useful to report than the checksum.
            if scratch[0] != WIRE_ID {
                return Err(Error::WireId(scratch[0]));
            }

            return Err(Error::Checksum {
                expected,
                actual: checksum::internet_checksum(&scratch),
            });
        }

        let actual = src.len();
        let wire_id = src.get_u8();
        if wire_id != WIRE_ID {
            return Err(Error::WireId(wire_id));
        }

        let kind = src.get_u8();
        let count = src.get_u16() as usize;
        let expected = src.get_u16() as usize;
        let _checksum = src.get_u16();

        if expected != actual {
            return Err(Error::Length { expected, actual });
        }

        match kind {
            KIND_DIGEST => {
                if count == 0 || count > MAX_DIGEST_DESCRIPTORS {
                    return Err(Error::Count(count));
                }

                let need = count * DESCRIPTOR_LEN;
                if src.len() != need {
                    return Err(Error::Length { expected: HEADER_LEN + need, actual });
                }

                let descriptors = (0..count).map(|_| RemoteDescriptor::decode(&mut src)).collect();
                Ok(Self::Digest(descriptors))
            }
            KIND_TUNNEL => {
                if count != 1 {
                    return Err(Error::Count(count));
                }

                if src.len() < DESCRIPTOR_LEN {
                    return Err(Error::Truncated {
                        what: "descriptor",
                        need: DESCRIPTOR_LEN,
                        have: src.len(),
                    });
                }

                let descriptor = RemoteDescriptor::decode(&mut src);
                Ok(Self::Tunnel { descriptor, payload: src })
            }
            kind => Err(Error::Kind(kind)),
        }
    }
}

/// Datagram codec for [`tokio_util::udp::UdpFramed`]. Every call to `decode` consumes the whole
/// buffer, which always holds exactly one received datagram.
#[derive(Debug, Default)]
pub struct Codec;

impl Codec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for Codec {
    type Item = Datagram;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let datagram = src.split().freeze();
        Ok(Some(Datagram::decode(datagram)?))
    }
}

impl Encoder<Datagram> for Codec {
    type Error = CodecError;

    fn encode(&mut self, item: Datagram, dst: &mut BytesMut) -> Result<(), Self::Error> {
        Ok(item.encode(dst)?)
    }
}
