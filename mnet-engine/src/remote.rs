//! Hands packets to the cores owning their next hop.
//!
//! ```text
//!        home core                               remote core
//!  ┌──────────────────┐   digest (descriptor)   ┌──────────────┐
//!  │ pcache: payload  │ ──────────────────────▶ │ emulate hop i│
//!  │                  │ ◀────────────────────── │   ...        │
//!  └──────────────────┘   digest (descriptor)   └──────────────┘
//!     reunite + walk on / release
//! ```
//!
//! With the pending cache enabled the home core keeps the payload and only descriptors travel.
//! Without it, or when a non-home core holds the payload, descriptor and payload travel together
//! in a tunnel datagram.
use std::{
    mem,
    net::{Ipv4Addr, SocketAddr},
};

use tracing::trace;

use crate::{
    aggregate::Aggregator, pcache::PendingCache, DropReason, EmulatorOptions, Packet, Payload,
    ProtocolError,
};
use mnet_common::Tick;
use mnet_wire::remote::{Datagram, RemoteDescriptor, DESCRIPTOR_LEN, HEADER_LEN, MAX_TUNNEL_LEN};

#[derive(Debug)]
pub(crate) struct RemoteForwarder {
    pcache: PendingCache,
    aggregator: Aggregator,
    /// Datagrams waiting for the transport.
    outbox: Vec<(Datagram, SocketAddr)>,
    use_pcache: bool,
    aggregate: bool,
    expire_ticks: Tick,
    port: u16,
}

impl RemoteForwarder {
    pub(crate) fn new(options: &EmulatorOptions) -> Self {
        Self {
            pcache: PendingCache::new(options.get_pcache_capacity()),
            aggregator: Aggregator::new(options.get_max_cores()),
            outbox: Vec::new(),
            use_pcache: options.get_pcache(),
            aggregate: options.get_aggregate(),
            expire_ticks: options.get_remote_expire(),
            port: options.get_remote_port(),
        }
    }

    /// The forwarding address of a core.
    #[inline]
    pub(crate) fn address_of(&self, core: Ipv4Addr) -> SocketAddr {
        SocketAddr::new(core.into(), self.port)
    }

    /// Hands `packet` to the core at `to`. The packet's hop index is the hop that core emulates
    /// next.
    pub(crate) fn forward(
        &mut self,
        mut packet: Packet,
        to: SocketAddr,
        now: Tick,
    ) -> Result<(), DropReason> {
        if packet.is_home() && self.use_pcache && matches!(packet.payload, Payload::Local(_)) {
            let descriptor = self
                .pcache
                .insert(packet, now + self.expire_ticks)
                .map_err(|_| DropReason::ResourceExhausted)?;

            trace!(handle = descriptor.handle, %to, hop = descriptor.hop, "Cached payload");
            self.push_descriptor(to, descriptor);
            return Ok(());
        }

        let descriptor = packet.descriptor();
        match packet.take_payload() {
            Payload::Local(payload) => {
                if HEADER_LEN + DESCRIPTOR_LEN + payload.len() > MAX_TUNNEL_LEN {
                    return Err(DropReason::ResourceExhausted);
                }

                self.outbox.push((Datagram::Tunnel { descriptor, payload }, to));
            }
            Payload::CachedAwaitingReturn(_) => self.push_descriptor(to, descriptor),
            Payload::RemoteOnly => return Err(DropReason::Fatal("payload already handed off")),
        }

        Ok(())
    }

    fn push_descriptor(&mut self, to: SocketAddr, descriptor: RemoteDescriptor) {
        if !self.aggregate {
            self.outbox.push((Datagram::Digest(vec![descriptor]), to));
            return;
        }

        if let Some(full) = self.aggregator.push(to, descriptor) {
            self.outbox.push(full);
        }
    }

    /// Takes the cached packet a returning descriptor belongs to.
    #[inline]
    pub(crate) fn reunite(
        &mut self,
        descriptor: &RemoteDescriptor,
        now: Tick,
    ) -> Result<Packet, ProtocolError> {
        self.pcache.reunite(descriptor, now)
    }

    /// Moves every buffered descriptor to the outbox.
    pub(crate) fn flush_aggregates(&mut self) {
        let Self { aggregator, outbox, .. } = self;
        outbox.extend(aggregator.drain());
    }

    /// Drops expired pending cache entries. Returns how many were dropped.
    #[inline]
    pub(crate) fn expire(&mut self, now: Tick) -> usize {
        self.pcache.expire(now)
    }

    #[inline]
    pub(crate) fn cached(&self) -> usize {
        self.pcache.len()
    }

    /// Takes the datagrams waiting for the transport.
    pub(crate) fn take_outbound(&mut self) -> Vec<(Datagram, SocketAddr)> {
        mem::take(&mut self.outbox)
    }
}
