//! Bulk-load records used to install a topology and to read hop statistics back.
//!
//! All records are big endian and packed. Tables are plain concatenations of records, except the
//! path table whose records are variable length.
use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::Error;

/// Loss probability that represents 100% loss.
pub const LOSS_MAX: u32 = 0x7fff_ffff;

/// Configuration of a single virtual link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HopRecord {
    /// Bandwidth in bits per second. Zero means unlimited.
    pub bandwidth_bps: u32,
    /// Propagation delay in milliseconds.
    pub delay_ms: u32,
    /// Loss probability as a fraction of [`LOSS_MAX`].
    pub loss: u32,
    /// Capacity of the bandwidth queue in packets.
    pub queue_slots: u32,
    /// Address of the emulator core that owns this hop. `None` if the hop is emulated locally.
    pub owner: Option<Ipv4Addr>,
    /// Per-hop discipline selector. Zero means no discipline.
    pub discipline: u32,
}

impl HopRecord {
    /// Length of an encoded hop record.
    pub const LEN: usize = 24;

    /// Creates a new unlimited, lossless, zero-delay hop.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bandwidth cap of the hop in bits per second.
    pub fn bandwidth(mut self, bps: u32) -> Self {
        self.bandwidth_bps = bps;
        self
    }

    /// Set the propagation delay of the hop in ms.
    pub fn delay(mut self, ms: u32) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Set the packet loss probability of the hop, between 0.0 and 1.0.
    pub fn loss(mut self, probability: f64) -> Self {
        self.loss = (probability.clamp(0.0, 1.0) * LOSS_MAX as f64) as u32;
        self
    }

    /// Set the queue capacity of the hop in packets.
    pub fn queue(mut self, slots: u32) -> Self {
        self.queue_slots = slots;
        self
    }

    /// Set the emulator core that owns the hop.
    pub fn owner(mut self, owner: Ipv4Addr) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Set the discipline selector of the hop.
    pub fn discipline(mut self, id: u32) -> Self {
        self.discipline = id;
        self
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u32(self.bandwidth_bps);
        dst.put_u32(self.delay_ms);
        dst.put_u32(self.loss);
        dst.put_u32(self.queue_slots);
        dst.put_u32(self.owner.map(u32::from).unwrap_or(0));
        dst.put_u32(self.discipline);
    }

    fn decode(src: &mut Bytes) -> Self {
        Self {
            bandwidth_bps: src.get_u32(),
            delay_ms: src.get_u32(),
            loss: src.get_u32(),
            queue_slots: src.get_u32(),
            owner: match src.get_u32() {
                0 => None,
                addr => Some(Ipv4Addr::from(addr)),
            },
            discipline: src.get_u32(),
        }
    }
}

/// The hop sequence between two virtual nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRecord {
    pub origin: u16,
    pub destination: u16,
    /// Indices into the hop table.
    pub hops: Vec<u32>,
}

impl PathRecord {
    /// Length of the fixed part of an encoded path record.
    pub const HEADER_LEN: usize = 6;

    pub fn new(origin: u16, destination: u16, hops: impl Into<Vec<u32>>) -> Self {
        Self { origin, destination, hops: hops.into() }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.origin);
        dst.put_u16(self.destination);
        dst.put_u16(self.hops.len() as u16);
        self.hops.iter().for_each(|hop| dst.put_u32(*hop));
    }
}

/// Maps the node bits of a real address to a virtual node id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRecord {
    pub addr: Ipv4Addr,
    pub node: u16,
}

impl NodeRecord {
    /// Length of an encoded node record.
    pub const LEN: usize = 6;

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u32(self.addr.into());
        dst.put_u16(self.node);
    }
}

/// Counters of a single hop, as read by the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsRecord {
    pub packets: u64,
    pub bytes: u64,
    pub drops: u64,
}

impl StatsRecord {
    /// Length of an encoded statistics record.
    pub const LEN: usize = 24;

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u64(self.packets);
        dst.put_u64(self.bytes);
        dst.put_u64(self.drops);
    }
}

fn fixed_table<T>(
    mut src: Bytes,
    record: usize,
    decode: impl Fn(&mut Bytes) -> T,
) -> Result<Vec<T>, Error> {
    if src.len() % record != 0 {
        return Err(Error::RecordSize { len: src.len(), record });
    }

    let mut out = Vec::with_capacity(src.len() / record);
    while src.has_remaining() {
        out.push(decode(&mut src));
    }

    Ok(out)
}

/// Decodes a hop table.
pub fn decode_hops(src: Bytes) -> Result<Vec<HopRecord>, Error> {
    fixed_table(src, HopRecord::LEN, HopRecord::decode)
}

/// Decodes a node table.
pub fn decode_nodes(src: Bytes) -> Result<Vec<NodeRecord>, Error> {
    fixed_table(src, NodeRecord::LEN, |src| NodeRecord {
        addr: Ipv4Addr::from(src.get_u32()),
        node: src.get_u16(),
    })
}

/// Decodes a statistics table.
pub fn decode_stats(src: Bytes) -> Result<Vec<StatsRecord>, Error> {
    fixed_table(src, StatsRecord::LEN, |src| StatsRecord {
        packets: src.get_u64(),
        bytes: src.get_u64(),
        drops: src.get_u64(),
    })
}

/// Decodes a path table.
pub fn decode_paths(mut src: Bytes) -> Result<Vec<PathRecord>, Error> {
    let mut out = Vec::new();

    while src.has_remaining() {
        if src.len() < PathRecord::HEADER_LEN {
            return Err(Error::Truncated {
                what: "path record",
                need: PathRecord::HEADER_LEN,
                have: src.len(),
            });
        }

        let origin = src.get_u16();
        let destination = src.get_u16();
        let count = src.get_u16() as usize;

        if src.len() < count * 4 {
            return Err(Error::Truncated { what: "path hops", need: count * 4, have: src.len() });
        }

        let hops = (0..count).map(|_| src.get_u32()).collect();
        out.push(PathRecord { origin, destination, hops });
    }

    Ok(out)
}

/// Encodes a table of records with the given encoder.
pub fn encode_table<T>(records: &[T], encode: impl Fn(&T, &mut BytesMut)) -> Bytes {
    let mut buf = BytesMut::new();
    records.iter().for_each(|record| encode(record, &mut buf));
    buf.freeze()
}
