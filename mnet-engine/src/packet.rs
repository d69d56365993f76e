use std::{
    fmt,
    mem,
    net::{Ipv4Addr, SocketAddr},
    num::NonZeroU64,
    sync::Arc,
};

use bytes::Bytes;

use crate::{HopId, Path, Topology};
use mnet_common::Tick;
use mnet_wire::remote::RemoteDescriptor;

/// Identifies a packet in the pending cache of its home core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheHandle(NonZeroU64);

impl CacheHandle {
    /// Returns `None` for 0, which means "not cached" on the wire.
    pub const fn new(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

/// Where the payload of a packet lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// The payload is owned by this core.
    Local(Bytes),
    /// The payload was handed to another core. Nothing is left to release here.
    RemoteOnly,
    /// The payload is held in the pending cache of the packet's home core.
    CachedAwaitingReturn(CacheHandle),
}

/// Which wait a queued packet is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Waiting for its bandwidth queue exit.
    Bandwidth,
    /// Waiting out the propagation delay.
    Delay,
    /// Waiting for bandwidth exit and delay in one go.
    Both,
}

/// Where a packet is in its walk along the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Entered the engine, no hop visited yet.
    Fresh,
    /// About to cross the hop at the current index.
    AtHop,
    /// Sitting in the calendar.
    Queued(QueueState),
}

/// The path a packet walks, together with the topology the path belongs to. Holding the
/// topology keeps its hops alive across a reconfiguration until the packet is done with them.
#[derive(Clone)]
pub(crate) struct Cursor {
    pub(crate) topology: Arc<Topology>,
    pub(crate) path: Path,
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("generation", &self.topology.generation())
            .field("path", &self.path)
            .finish()
    }
}

/// The emulation state of a single packet.
#[derive(Debug)]
pub struct Packet {
    pub(crate) cursor: Cursor,
    /// Index of the next hop to cross.
    pub(crate) hop: usize,
    pub(crate) hop_count: u32,
    pub(crate) phase: Phase,
    /// The hop whose queue the packet is waiting in.
    pub(crate) last_hop: Option<HopId>,
    /// Delay still to be applied after the bandwidth wait, in split mode.
    pub(crate) pending_delay: Tick,
    pub(crate) src: Ipv4Addr,
    pub(crate) dst: Ipv4Addr,
    pub(crate) len: u32,
    pub(crate) handle: Option<CacheHandle>,
    pub(crate) expire: Tick,
    pub(crate) ttl: i8,
    pub(crate) wait: u32,
    /// Forwarding address of the home core. `None` if this core is home.
    pub(crate) home: Option<SocketAddr>,
    pub(crate) annotation: u32,
    pub(crate) payload: Payload,
}

impl Packet {
    /// A packet that entered the engine from the host stack. This core is its home.
    pub(crate) fn local(cursor: Cursor, src: Ipv4Addr, dst: Ipv4Addr, payload: Bytes) -> Self {
        Self {
            cursor,
            hop: 0,
            hop_count: 0,
            phase: Phase::Fresh,
            last_hop: None,
            pending_delay: 0,
            src,
            dst,
            len: payload.len() as u32,
            handle: None,
            expire: 0,
            ttl: 0,
            wait: 0,
            home: None,
            annotation: 0,
            payload: Payload::Local(payload),
        }
    }

    /// A packet whose control state arrived from another core.
    pub(crate) fn remote(
        descriptor: &RemoteDescriptor,
        cursor: Cursor,
        home: Option<SocketAddr>,
        payload: Payload,
    ) -> Self {
        Self {
            cursor,
            hop: descriptor.hop as usize,
            hop_count: 0,
            phase: Phase::AtHop,
            last_hop: None,
            pending_delay: 0,
            src: descriptor.src,
            dst: descriptor.dst,
            len: descriptor.len,
            handle: CacheHandle::new(descriptor.handle),
            expire: descriptor.expire,
            ttl: descriptor.ttl,
            wait: descriptor.wait,
            home,
            annotation: 0,
            payload,
        }
    }

    /// Builds the remote descriptor for handing the packet to the core owning the current hop.
    pub(crate) fn descriptor(&self) -> RemoteDescriptor {
        RemoteDescriptor {
            handle: self.handle.map_or(0, CacheHandle::get),
            expire: self.expire,
            len: self.len,
            wait: self.wait,
            src: self.src,
            dst: self.dst,
            hop: self.hop as u32,
            ttl: self.ttl,
        }
    }

    /// Moves the payload out, leaving [`Payload::RemoteOnly`] behind.
    pub(crate) fn take_payload(&mut self) -> Payload {
        mem::replace(&mut self.payload, Payload::RemoteOnly)
    }

    #[inline]
    pub fn src(&self) -> Ipv4Addr {
        self.src
    }

    #[inline]
    pub fn dst(&self) -> Ipv4Addr {
        self.dst
    }

    /// Length of the packet in bytes.
    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Index of the next hop to cross.
    #[inline]
    pub fn hop_index(&self) -> usize {
        self.hop
    }

    /// Number of hops crossed on this core.
    #[inline]
    pub fn hop_count(&self) -> u32 {
        self.hop_count
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[inline]
    pub fn ttl(&self) -> i8 {
        self.ttl
    }

    /// Accumulated emulated wait in ticks.
    #[inline]
    pub fn wait(&self) -> u32 {
        self.wait
    }

    /// The path the packet walks.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.cursor.path
    }

    #[inline]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Returns `true` if this core is the packet's home.
    #[inline]
    pub fn is_home(&self) -> bool {
        self.home.is_none()
    }

    /// A word of local state disciplines may use to annotate the packet. It does not travel to
    /// other cores.
    #[inline]
    pub fn annotation(&self) -> u32 {
        self.annotation
    }

    #[inline]
    pub fn set_annotation(&mut self, annotation: u32) {
        self.annotation = annotation;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A local packet of `len` bytes on an empty path.
    pub(crate) fn packet(len: usize) -> Packet {
        let cursor = Cursor { topology: Arc::new(Topology::default()), path: Arc::from([]) };
        Packet::local(
            cursor,
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            Bytes::from(vec![0; len]),
        )
    }

    #[test]
    fn payload_moves_out_once() {
        let mut packet = packet(64);
        assert!(packet.is_home());
        assert_eq!(packet.len(), 64);

        assert!(matches!(packet.take_payload(), Payload::Local(bytes) if bytes.len() == 64));
        assert_eq!(packet.take_payload(), Payload::RemoteOnly);
    }

    #[test]
    fn descriptor_reflects_packet_state() {
        let mut packet = packet(100);
        packet.hop = 2;
        packet.ttl = 9;
        packet.handle = CacheHandle::new(77);
        packet.expire = 1234;

        let descriptor = packet.descriptor();
        assert_eq!(descriptor.hop, 2);
        assert_eq!(descriptor.ttl, 9);
        assert_eq!(descriptor.handle, 77);
        assert_eq!(descriptor.expire, 1234);
        assert_eq!(descriptor.len, 100);
        assert!(CacheHandle::new(0).is_none());
    }
}
