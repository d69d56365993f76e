//! Packs descriptors headed for the same core into digest datagrams.
use std::{mem, net::SocketAddr};

use rustc_hash::FxHashMap;

use mnet_wire::remote::{Datagram, RemoteDescriptor, MAX_DIGEST_DESCRIPTORS};

/// Per-destination descriptor buffers, each bounded by a single digest datagram.
#[derive(Debug)]
pub(crate) struct Aggregator {
    buffers: FxHashMap<SocketAddr, Vec<RemoteDescriptor>>,
    /// Maximum number of destinations buffered at once.
    max_destinations: usize,
}

impl Aggregator {
    pub(crate) fn new(max_destinations: usize) -> Self {
        Self { buffers: FxHashMap::default(), max_destinations }
    }

    /// Number of descriptors waiting to be flushed.
    pub(crate) fn pending(&self) -> usize {
        self.buffers.values().map(Vec::len).sum()
    }

    /// Buffers `descriptor` for `to`. Returns a datagram that has to be sent right away, either
    /// because the buffer for `to` is full or because no buffer is free for a new destination.
    pub(crate) fn push(
        &mut self,
        to: SocketAddr,
        descriptor: RemoteDescriptor,
    ) -> Option<(Datagram, SocketAddr)> {
        if !self.buffers.contains_key(&to) && self.buffers.len() >= self.max_destinations {
            return Some((Datagram::Digest(vec![descriptor]), to));
        }

        let buffer = self.buffers.entry(to).or_default();
        buffer.push(descriptor);

        if buffer.len() >= MAX_DIGEST_DESCRIPTORS {
            let full = mem::take(buffer);
            self.buffers.remove(&to);
            return Some((Datagram::Digest(full), to));
        }

        None
    }

    /// Empties every buffer into one digest per destination.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = (Datagram, SocketAddr)> + '_ {
        self.buffers
            .drain()
            .filter(|(_, buffer)| !buffer.is_empty())
            .map(|(to, buffer)| (Datagram::Digest(buffer), to))
    }
}
